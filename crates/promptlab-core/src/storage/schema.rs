pub const SCHEMA_VERSION: i64 = 1;

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL,
  finished_at TEXT NOT NULL,
  definition_name TEXT NOT NULL,
  definition_hash TEXT NOT NULL,
  models_json TEXT NOT NULL,
  status TEXT NOT NULL,
  result_count INTEGER NOT NULL,
  match_count INTEGER NOT NULL,
  error_count INTEGER NOT NULL,
  input_tokens INTEGER NOT NULL,
  output_tokens INTEGER NOT NULL,
  total_cost REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS results (
  run_id TEXT NOT NULL REFERENCES runs(id),
  slot INTEGER NOT NULL,
  test_case_idx INTEGER NOT NULL,
  model TEXT NOT NULL,
  inputs_json TEXT NOT NULL,
  rendered_prompt TEXT,
  expected TEXT NOT NULL,
  response TEXT,
  match_mode TEXT NOT NULL,
  outcome TEXT NOT NULL,
  match_details TEXT,
  input_tokens INTEGER NOT NULL,
  output_tokens INTEGER NOT NULL,
  cost REAL NOT NULL,
  latency_ms INTEGER NOT NULL,
  error_json TEXT,
  judge_json TEXT,
  PRIMARY KEY (run_id, slot)
);

CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at_ms DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_runs_definition ON runs(definition_name, created_at_ms DESC);
CREATE INDEX IF NOT EXISTS idx_results_pair ON results(run_id, test_case_idx, model);
"#;
