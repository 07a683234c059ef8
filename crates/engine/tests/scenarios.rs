use chrono::{TimeZone, Utc};
use drift_engine::{
    CancellationToken, DriftEngine, EngineConfig, EngineError, IngestSource, TraceJournal,
    VerifyOptions,
};
use drift_protocol::{
    FindingStatus, Fork, ForkScope, ReviewDecision, Severity, UnevaluatedReason, Verdict,
};
use drift_reasoning::{HeuristicOracle, ScriptedOracle};
use drift_vector_store::EmbeddingIndex;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SPEC: &str = "# Vault accounting

## Deposits

A deposit MUST increase the account balance by the deposited amount.

## Withdrawals

The balance MUST be checked to cover the requested amount before a withdrawal reduces it.

## Fees

The base fee MUST be burned.
";

const WITHDRAW: &str = "class Vault:
    def withdraw(self, amount):
        self.balance -= amount
";

const UNRELATED: &str = "class Keyring:
    def rotate(self):
        self.keyring = []
";

fn write(root: &Path, name: &str, text: &str) {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "specs/cancun/vault.md", SPEC);
        write(dir.path(), "code/vault.py", WITHDRAW);
        write(dir.path(), "other/keyring.py", UNRELATED);
        Self { dir }
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }

    fn source(&self, docs: &str, fork: &str) -> IngestSource {
        IngestSource {
            repo: self.path(docs),
            git_ref: None,
            fork: Fork::new(fork),
        }
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        backoff_base_ms: 1,
        backoff_max_ms: 2,
        ..EngineConfig::default()
    }
}

fn heuristic() -> Arc<HeuristicOracle> {
    Arc::new(HeuristicOracle::new())
}

fn fixed_options() -> VerifyOptions {
    VerifyOptions {
        commit: Some("0123abc".into()),
        generated_at: Some(Utc.with_ymd_and_hms(2024, 3, 13, 12, 0, 0).unwrap()),
    }
}

fn cancun() -> Fork {
    Fork::new("cancun")
}

fn chunk_containing(engine: &DriftEngine, fork: &Fork, needle: &str) -> String {
    let view = engine.index().snapshot();
    let chunks = view.chunks_in(&ForkScope::exact(fork.clone()));
    chunks
        .iter()
        .find(|stored| stored.chunk.text.contains(needle))
        .map(|stored| stored.chunk.id.clone())
        .unwrap()
}

#[tokio::test]
async fn unguarded_write_is_reported_as_drift_against_the_withdrawal_rule() {
    let ws = Workspace::new();
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    let ingested = engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();
    assert_eq!(ingested.summary.chunks_added, 3);
    assert!(ingested.conflicts.is_empty());

    let report = engine
        .verify(&ws.path("code"), &cancun(), fixed_options())
        .await
        .unwrap();

    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.verdict, Verdict::Drift);
    assert_eq!(finding.unit_id, "vault.py::Vault.withdraw");
    assert!(finding.severity >= Severity::Warning);
    assert_eq!(finding.status(), FindingStatus::Open);
    let withdrawal = chunk_containing(&engine, &cancun(), "withdrawal reduces");
    assert!(finding.chunk_ids.contains(&withdrawal));
    assert_eq!(report.summary.drift_findings, 1);
    assert_eq!(report.summary.units_analyzed, 1);
}

#[tokio::test]
async fn unit_without_matching_text_is_unevaluated_with_zero_confidence() {
    let ws = Workspace::new();
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();

    let report = engine
        .verify(&ws.path("other"), &cancun(), fixed_options())
        .await
        .unwrap();

    assert!(report.findings.is_empty());
    assert_eq!(report.unevaluated.len(), 1);
    let entry = &report.unevaluated[0];
    assert_eq!(entry.unit_id, "keyring.py::Keyring.rotate");
    assert_eq!(entry.reason, UnevaluatedReason::NoRelevantSpecification);
    assert_eq!(entry.verdict, Verdict::InsufficientEvidence);
    assert_eq!(entry.raw_confidence, 0.0);
    assert_eq!(report.summary.compliant, 0);
}

#[tokio::test]
async fn malformed_oracle_output_leaves_the_unit_unevaluated() {
    let ws = Workspace::new();
    let oracle = Arc::new(ScriptedOracle::constant("I think it is probably fine"));
    let engine = DriftEngine::new(config(), oracle.clone()).unwrap();
    engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();

    let report = engine
        .verify(&ws.path("code"), &cancun(), fixed_options())
        .await
        .unwrap();

    assert_eq!(oracle.calls(), 2);
    assert!(report.findings.is_empty());
    assert_eq!(report.unevaluated.len(), 1);
    assert_eq!(
        report.unevaluated[0].reason,
        UnevaluatedReason::OracleMalformedOutput
    );
}

#[tokio::test]
async fn identical_runs_produce_identical_reports() {
    let ws = Workspace::new();
    let mut outputs = Vec::new();
    for _ in 0..2 {
        let engine = DriftEngine::new(config(), heuristic()).unwrap();
        engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();
        let report = engine
            .verify(ws.dir.path(), &cancun(), fixed_options())
            .await
            .unwrap();
        outputs.push(report.to_json().unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn other_forks_are_invisible_unless_widened() {
    let ws = Workspace::new();
    write(
        ws.dir.path(),
        "specs/cancun-only/deposits.md",
        "## Deposits\n\nA deposit MUST increase the account balance by the deposited amount.\n",
    );

    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    engine.ingest(&ws.source("specs/cancun-only", "cancun")).await.unwrap();
    engine.ingest(&ws.source("specs/cancun", "shanghai")).await.unwrap();

    let report = engine
        .verify(&ws.path("code"), &cancun(), fixed_options())
        .await
        .unwrap();
    assert!(report.findings.is_empty());

    let widened = DriftEngine::new(
        EngineConfig {
            widen_forks: vec![Fork::new("shanghai")],
            ..config()
        },
        heuristic(),
    )
    .unwrap();
    widened.ingest(&ws.source("specs/cancun-only", "cancun")).await.unwrap();
    widened.ingest(&ws.source("specs/cancun", "shanghai")).await.unwrap();
    let report = widened
        .verify(&ws.path("code"), &cancun(), fixed_options())
        .await
        .unwrap();
    assert_eq!(report.findings.len(), 1);
    let withdrawal = chunk_containing(&widened, &Fork::new("shanghai"), "withdrawal reduces");
    assert!(report.findings[0].chunk_ids.contains(&withdrawal));
}

#[tokio::test]
async fn ingesting_twice_changes_nothing() {
    let ws = Workspace::new();
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    let first = engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();
    let generation = engine.index().snapshot().generation();
    let second = engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();

    assert_eq!(second.summary.chunks_added, 0);
    assert_eq!(second.summary.chunks_removed, 0);
    assert_eq!(second.summary.chunks_skipped, first.summary.chunks_added);
    assert_eq!(engine.index().len(), first.summary.chunks_added);
    assert_eq!(engine.index().snapshot().generation(), generation);
}

#[tokio::test]
async fn verifying_against_an_empty_fork_fails_the_run() {
    let ws = Workspace::new();
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    engine.ingest(&ws.source("specs/cancun", "shanghai")).await.unwrap();

    let err = engine
        .verify(&ws.path("code"), &cancun(), fixed_options())
        .await
        .unwrap_err();
    assert!(err.is_empty_index(), "{err}");
}

#[tokio::test]
async fn missing_source_fails_the_run() {
    let ws = Workspace::new();
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();

    let err = engine
        .verify(&ws.path("specs"), &cancun(), fixed_options())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoSource(_)), "{err}");
}

#[tokio::test]
async fn cancelled_run_lists_unstarted_units() {
    let ws = Workspace::new();
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine
        .verify_with_cancel(ws.dir.path(), &cancun(), fixed_options(), &cancel)
        .await
        .unwrap();

    assert!(report.findings.is_empty());
    assert_eq!(report.summary.cancelled, 2);
    assert!(report
        .unevaluated
        .iter()
        .all(|entry| entry.reason == UnevaluatedReason::Cancelled));
}

#[tokio::test]
async fn unparsable_files_are_listed_but_do_not_abort() {
    let ws = Workspace::new();
    write(ws.dir.path(), "code/broken.py", "def f(:\n  pass\n");
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();

    let analysis = engine.analyze(&ws.path("code"), &cancun()).await.unwrap();
    assert_eq!(analysis.files, 2);
    assert_eq!(analysis.units.len(), 1);
    assert_eq!(analysis.failures.len(), 1);
    assert_eq!(analysis.failures[0].unit_id, "broken.py");

    let report = engine
        .verify(&ws.path("code"), &cancun(), fixed_options())
        .await
        .unwrap();
    assert_eq!(report.findings.len(), 1);
    assert!(report
        .unevaluated
        .iter()
        .any(|entry| entry.reason == UnevaluatedReason::ExtractionFailed));
}

#[tokio::test]
async fn state_survives_between_engines() {
    let ws = Workspace::new();
    let state = ws.path("state");
    let config = EngineConfig {
        store_path: Some(state.join("index.json")),
        calibration_path: Some(state.join("calibration.json")),
        journal_path: Some(state.join("traces.jsonl")),
        ..config()
    };

    let first = DriftEngine::open(config.clone(), heuristic()).await.unwrap();
    first.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();
    drop(first);

    let second = DriftEngine::open(config.clone(), heuristic()).await.unwrap();
    assert_eq!(second.index().len(), 3);
    let mut report = second
        .verify(&ws.path("code"), &cancun(), fixed_options())
        .await
        .unwrap();
    let id = report.findings[0].id.clone();
    let status = second
        .review(&mut report, &id, ReviewDecision::Confirm)
        .await
        .unwrap();
    assert_eq!(status, FindingStatus::Confirmed);
    assert!(second
        .review(&mut report, &id, ReviewDecision::Dismiss)
        .await
        .is_err());

    let journal = TraceJournal::read_all(state.join("traces.jsonl")).await.unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].trace.unit_id, "vault.py::Vault.withdraw");

    let third = DriftEngine::open(config, heuristic()).await.unwrap();
    assert_eq!(third.calibration().snapshot().len(), 1);
}

fn git(dir: &Path, args: &[&str]) -> bool {
    std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=drift", "-c", "user.email=drift@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn git_ref_ingestion_reads_committed_text_below_the_repo_root() {
    let ws = Workspace::new();
    let root = ws.dir.path();
    if !git(root, &["init", "-q"]) {
        eprintln!("git unavailable; skipping");
        return;
    }
    assert!(git(root, &["add", "."]));
    assert!(git(root, &["commit", "-q", "-m", "spec"]));
    write(root, "specs/cancun/vault.md", "# Vault\n\nRewritten after the commit.\n");

    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    let source = IngestSource {
        repo: ws.path("specs/cancun"),
        git_ref: Some("HEAD".into()),
        fork: cancun(),
    };
    let outcome = engine.ingest(&source).await.unwrap();

    assert_eq!(outcome.documents, 1);
    assert_eq!(outcome.summary.chunks_added, 3);
    let withdrawal = chunk_containing(&engine, &cancun(), "withdrawal reduces");
    let view = engine.index().snapshot();
    let stored = view
        .chunks_in(&ForkScope::exact(cancun()))
        .into_iter()
        .find(|stored| stored.chunk.id == withdrawal)
        .unwrap();
    assert_eq!(stored.chunk.document_id, "vault.md");
}

#[tokio::test]
async fn same_named_units_are_judged_separately() {
    let ws = Workspace::new();
    write(
        ws.dir.path(),
        "twice/vault.py",
        "class Vault:
    def withdraw(self, amount):
        if self.balance < amount:
            raise ValueError(\"low\")
        self.balance -= amount

class Vault:
    def withdraw(self, amount):
        self.balance -= amount
",
    );
    let engine = DriftEngine::new(config(), heuristic()).unwrap();
    engine.ingest(&ws.source("specs/cancun", "cancun")).await.unwrap();

    let analysis = engine.analyze(&ws.path("twice"), &cancun()).await.unwrap();
    let ids: Vec<&str> = analysis.units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["vault.py::Vault.withdraw#2", "vault.py::Vault.withdraw#8"]);

    let report = engine
        .verify(&ws.path("twice"), &cancun(), fixed_options())
        .await
        .unwrap();
    assert_eq!(report.summary.units_analyzed, 2);
    assert_eq!(report.summary.drift_findings, 1);
    let drift: Vec<&str> = report
        .findings
        .iter()
        .filter(|f| f.verdict == Verdict::Drift)
        .map(|f| f.unit_id.as_str())
        .collect();
    assert_eq!(drift, vec!["vault.py::Vault.withdraw#8"]);
}
