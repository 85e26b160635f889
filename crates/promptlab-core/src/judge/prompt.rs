pub(crate) fn build_prompt(expected: &str, actual: &str) -> String {
    format!(
        "Compare these two responses and determine if they convey the same meaning or intent.\n\n\
         Expected: {}\n\
         Actual: {}\n\n\
         Respond with only \"YES\" if they match semantically, or \"NO\" if they don't match. Consider:\n\
         - Similar meanings expressed differently\n\
         - Equivalent information presented in different formats\n\
         - Minor variations in wording that don't change the core intent\n\n\
         Answer: ",
        expected, actual
    )
}
