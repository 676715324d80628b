//! Relational schema for the governance core.
//!
//! Timestamps are RFC3339 TEXT; nested structures serialize as JSON
//! columns. Statuses carry CHECK constraints so a bad writer cannot
//! smuggle an unknown state past the store.

/// Current schema version recorded in `schema_migrations`.
pub const SCHEMA_VERSION: i64 = 1;

/// Full schema, applied idempotently at open.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS symbols (
  id TEXT PRIMARY KEY,
  symbol_path TEXT NOT NULL,
  module_path TEXT NOT NULL,
  qualified_name TEXT NOT NULL,
  kind TEXT NOT NULL CHECK (kind IN ('function','method','class','module')),
  signature_json TEXT NOT NULL,
  fingerprint TEXT NOT NULL,
  state TEXT NOT NULL CHECK (state IN ('discovered','classified','bound','verified','deprecated')),
  health TEXT NOT NULL CHECK (health IN ('healthy','degraded','failing','unknown')),
  public INTEGER NOT NULL CHECK (public IN (0,1)),
  capability_hint TEXT,
  intent TEXT,
  calls_json TEXT NOT NULL,
  previous_paths_json TEXT NOT NULL,
  first_seen TEXT NOT NULL,
  last_modified TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_symbols_fingerprint ON symbols(fingerprint);
CREATE UNIQUE INDEX IF NOT EXISTS idx_symbols_live_path
  ON symbols(symbol_path) WHERE state != 'deprecated';

CREATE TABLE IF NOT EXISTS capabilities (
  id TEXT PRIMARY KEY,
  domain TEXT NOT NULL,
  name TEXT NOT NULL,
  owner TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('active','draft','deprecated')),
  depends_on_json TEXT NOT NULL,
  coverage_percent REAL NOT NULL,
  UNIQUE(domain, name)
);

CREATE TABLE IF NOT EXISTS capability_links (
  symbol_id TEXT NOT NULL,
  capability_id TEXT NOT NULL,
  source TEXT NOT NULL CHECK (source IN ('manual','rule','auditor-infer','llm-classified')),
  confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
  verified INTEGER NOT NULL CHECK (verified IN (0,1)),
  linked_at TEXT NOT NULL,
  PRIMARY KEY (symbol_id, capability_id, source),
  FOREIGN KEY (symbol_id) REFERENCES symbols(id),
  FOREIGN KEY (capability_id) REFERENCES capabilities(id)
);

CREATE TABLE IF NOT EXISTS audit_runs (
  id TEXT PRIMARY KEY,
  source TEXT NOT NULL,
  commit_ref TEXT,
  scope_key TEXT NOT NULL,
  scope_json TEXT NOT NULL,
  score REAL NOT NULL,
  passed INTEGER NOT NULL CHECK (passed IN (0,1)),
  violations_found INTEGER NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('completed','abandoned')),
  started_at TEXT NOT NULL,
  finished_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_runs_scope ON audit_runs(scope_key, started_at);

CREATE TABLE IF NOT EXISTS violations (
  id TEXT PRIMARY KEY,
  run_id TEXT NOT NULL,
  rule_id TEXT NOT NULL,
  symbol_id TEXT NOT NULL,
  task_id TEXT,
  severity TEXT NOT NULL CHECK (severity IN ('info','warning','error','critical')),
  description TEXT NOT NULL,
  detected_at TEXT NOT NULL,
  resolved_at TEXT,
  resolution_notes TEXT,
  FOREIGN KEY (run_id) REFERENCES audit_runs(id)
);

CREATE INDEX IF NOT EXISTS idx_violations_run ON violations(run_id);
CREATE INDEX IF NOT EXISTS idx_violations_open ON violations(resolved_at) WHERE resolved_at IS NULL;

CREATE TABLE IF NOT EXISTS proposals (
  id TEXT PRIMARY KEY,
  target_path TEXT NOT NULL,
  changes_json TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  justification TEXT NOT NULL,
  risk_tier TEXT NOT NULL CHECK (risk_tier IN ('low','medium','high')),
  is_critical INTEGER NOT NULL CHECK (is_critical IN (0,1)),
  status TEXT NOT NULL CHECK (status IN ('open','approved','rejected','superseded')),
  integrated_at TEXT,
  created_by TEXT NOT NULL,
  created_at TEXT NOT NULL,
  canary_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_proposals_path ON proposals(target_path);

CREATE TABLE IF NOT EXISTS proposal_signatures (
  proposal_id TEXT NOT NULL,
  approver TEXT NOT NULL,
  signature_hex TEXT NOT NULL,
  signed_at TEXT NOT NULL,
  valid INTEGER NOT NULL CHECK (valid IN (0,1)),
  PRIMARY KEY (proposal_id, approver),
  FOREIGN KEY (proposal_id) REFERENCES proposals(id)
);

CREATE TABLE IF NOT EXISTS tasks (
  id TEXT PRIMARY KEY,
  intent TEXT NOT NULL,
  role TEXT NOT NULL,
  parent_id TEXT,
  status TEXT NOT NULL CHECK (status IN ('pending','planning','executing','validating','completed','failed','blocked')),
  proposal_id TEXT,
  requires_approval INTEGER NOT NULL CHECK (requires_approval IN (0,1)),
  context_refs_json TEXT NOT NULL,
  complexity INTEGER NOT NULL,
  created_at TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT,
  FOREIGN KEY (parent_id) REFERENCES tasks(id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_role_status ON tasks(role, status);
";
