use std::thread::sleep;
use std::time::Duration;

use promptlab_core::errors::{ItemError, StoreError};
use promptlab_core::model::{
    JudgeTrace, MatchMode, Outcome, Run, RunDraft, RunResult, RunStatus, TestCase,
};
use promptlab_core::Store;

fn case(country: &str, expected: &str) -> TestCase {
    TestCase::new(expected).with_input("country", country)
}

fn answered(
    idx: usize,
    model: &str,
    case: &TestCase,
    response: &str,
    outcome: Outcome,
) -> RunResult {
    let mut r = RunResult::pending(idx, model, case, MatchMode::Exact);
    r.rendered_prompt = Some(format!("Capital of {}?", case.inputs["country"]));
    r.response = Some(response.to_string());
    r.outcome = outcome;
    r.match_details = Some("Exact match".into());
    r.input_tokens = 12;
    r.output_tokens = 3;
    r.cost = 0.000_041;
    r.latency_ms = 87;
    r
}

fn sample_run(name: &str) -> Run {
    let france = case("France", "Paris");
    let italy = case("Italy", "Rome");
    let mut judged = answered(1, "gpt-4o", &italy, "Roma", Outcome::Pass);
    judged.match_mode = MatchMode::Semantic;
    judged.judge = Some(JudgeTrace {
        model: "gpt-4o-mini".into(),
        reply: Some("YES".into()),
        input_tokens: 40,
        output_tokens: 1,
        cost: 0.000_006,
        latency_ms: 210,
    });
    let results = vec![
        answered(0, "gpt-4o", &france, "Paris", Outcome::Pass),
        answered(0, "claude-3-5-haiku", &france, "Lyon", Outcome::Fail),
        judged,
        RunResult::pending(1, "claude-3-5-haiku", &italy, MatchMode::Exact)
            .failed(ItemError::Timeout { after_ms: 30_000 }),
    ];
    RunDraft::new(name, "0123456789abcdef", vec!["gpt-4o".into(), "claude-3-5-haiku".into()])
        .seal(results, RunStatus::Completed)
}

/// Each draft gets a distinct millisecond so creation order is unambiguous.
fn runs_in_order(names: &[&str]) -> Vec<Run> {
    names
        .iter()
        .map(|name| {
            sleep(Duration::from_millis(3));
            sample_run(name)
        })
        .collect()
}

#[test]
fn saved_run_loads_back_identical() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let run = sample_run("capitals");
    store.save(&run)?;

    let loaded = store.load(run.id())?;
    assert_eq!(loaded, run);
    assert_eq!(loaded.totals().results, 4);
    assert_eq!(loaded.totals().matches, 2);
    assert_eq!(loaded.totals().errors, 1);
    assert_eq!(
        loaded.results()[3].error,
        Some(ItemError::Timeout { after_ms: 30_000 })
    );
    assert_eq!(loaded.results()[2].judge.as_ref().and_then(|j| j.reply.as_deref()), Some("YES"));
    Ok(())
}

#[test]
fn loading_twice_gives_the_same_run() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let run = sample_run("capitals");
    store.save(&run)?;
    assert_eq!(store.load(run.id())?, store.load(run.id())?);
    Ok(())
}

#[test]
fn unknown_run_is_not_found() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let err = store.load("20240101T000000000Z-deadbeef").unwrap_err();
    assert!(
        matches!(&err, StoreError::NotFound { run_id } if run_id == "20240101T000000000Z-deadbeef"),
        "{err}"
    );
    assert!(!store.exists("20240101T000000000Z-deadbeef")?);
    Ok(())
}

#[test]
fn saving_the_same_id_twice_is_rejected() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let run = sample_run("capitals");
    store.save(&run)?;
    assert!(store.exists(run.id())?);

    let err = store.save(&run).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }), "{err}");
    // The first copy is untouched.
    assert_eq!(store.load(run.id())?.results().len(), 4);
    Ok(())
}

#[test]
fn listing_is_newest_first_and_paginates() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let runs = runs_in_order(&["a", "b", "c", "d", "e"]);
    for run in &runs {
        store.save(run)?;
    }

    let ids: Vec<String> = store.list(10, 0)?.into_iter().map(|s| s.id).collect();
    let expected: Vec<String> = runs.iter().rev().map(|r| r.id().to_string()).collect();
    assert_eq!(ids, expected);

    let page: Vec<String> = store.list(2, 1)?.into_iter().map(|s| s.definition_name).collect();
    assert_eq!(page, vec!["d", "c"]);
    assert!(store.list(10, 5)?.is_empty());
    Ok(())
}

#[test]
fn listing_by_definition_filters() -> anyhow::Result<()> {
    let store = Store::memory()?;
    for run in runs_in_order(&["capitals", "translate", "capitals"]) {
        store.save(&run)?;
    }

    let capitals = store.list_for_definition("capitals", 10, 0)?;
    assert_eq!(capitals.len(), 2);
    assert!(capitals.iter().all(|s| s.definition_name == "capitals"));
    assert!(capitals[0].created_at > capitals[1].created_at);
    assert!(store.list_for_definition("missing", 10, 0)?.is_empty());
    Ok(())
}

#[test]
fn summary_carries_totals() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let run = sample_run("capitals");
    store.save(&run)?;

    let summaries = store.list(1, 0)?;
    assert_eq!(summaries, vec![run.summary()]);
    let totals = &summaries[0].totals;
    assert_eq!(totals.input_tokens, 12 * 3);
    assert_eq!(totals.output_tokens, 3 * 3);
    assert_eq!(summaries[0].models, vec!["gpt-4o", "claude-3-5-haiku"]);
    Ok(())
}

#[test]
fn aborted_runs_persist_with_their_cancelled_slots() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let tc = case("France", "Paris");
    let results = vec![
        answered(0, "gpt-4o", &tc, "Paris", Outcome::Pass),
        RunResult::pending(0, "gpt-4o-mini", &tc, MatchMode::Exact).failed(ItemError::Cancelled),
    ];
    let models = vec!["gpt-4o".into(), "gpt-4o-mini".into()];
    let run =
        RunDraft::new("capitals", "0123456789abcdef", models).seal(results, RunStatus::Aborted);
    store.save(&run)?;

    let loaded = store.load(run.id())?;
    assert_eq!(loaded.status(), RunStatus::Aborted);
    assert_eq!(loaded.results()[1].error, Some(ItemError::Cancelled));
    assert_eq!(store.list(1, 0)?[0].status, RunStatus::Aborted);
    Ok(())
}

#[test]
fn runs_survive_reopening_the_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("results.db");
    let run = sample_run("capitals");
    {
        let store = Store::open(&path)?;
        store.save(&run)?;
    }

    let reopened = Store::open(&path)?;
    assert_eq!(reopened.load(run.id())?, run);
    assert_eq!(reopened.list(10, 0)?.len(), 1);
    Ok(())
}

#[test]
fn file_store_reads_while_another_handle_writes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("results.db");
    let writer = Store::open(&path)?;
    let other = writer.clone();

    let runs = runs_in_order(&["a", "b", "c"]);
    let handle = std::thread::spawn(move || -> Result<(), StoreError> {
        for run in &runs {
            other.save(run)?;
        }
        Ok(())
    });
    // Reads interleave with the saves and always see whole runs.
    for _ in 0..20 {
        for summary in writer.list(10, 0)? {
            assert_eq!(writer.load(&summary.id)?.results().len(), 4);
        }
    }
    handle.join().expect("writer thread panicked")?;
    assert_eq!(writer.list(10, 0)?.len(), 3);
    Ok(())
}
