use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::git;
use crate::journal::TraceJournal;
use crate::limits::UnitLimiter;
use crate::scanner::{FileScanner, ScanTarget};
use chrono::{DateTime, Utc};
use drift_behavior::{BehaviorExtractor, ExtractionError};
use drift_comparator::{CalibrationStore, Comparator, ReviewDesk};
use drift_protocol::{
    BehavioralUnit, FindingStatus, Fork, ReasoningTrace, RetrievalResult, ReviewDecision,
    SourceLocation, UnevaluatedReason, UnevaluatedUnit,
};
use drift_reasoning::{ReasoningEngine, ReasoningOracle, StructuredPrompt};
use drift_report::{Report, RunMetadata, RunOutcome};
use drift_search::{RetrievalRun, Retriever};
use drift_spec_chunker::{ChunkerError, SpecChunker, SpecDocument};
use drift_vector_store::{
    EmbeddingIndex, HashingEmbedder, IngestionSummary, MemoryIndex, VectorStoreError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Where specification documents come from
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSource {
    pub repo: PathBuf,
    /// Read documents at this revision instead of the working tree
    pub git_ref: Option<String>,
    pub fork: Fork,
}

/// A document whose chunks collided with different content already indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestConflict {
    pub document_id: String,
    pub chunk_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestOutcome {
    #[serde(flatten)]
    pub summary: IngestionSummary,
    pub documents: usize,
    pub skipped_documents: Vec<String>,
    pub conflicts: Vec<IngestConflict>,
}

/// Behavioral units of a code path plus the files that could not be modelled
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analysis {
    pub files: usize,
    pub units: Vec<BehavioralUnit>,
    pub failures: Vec<UnevaluatedUnit>,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Stamped into the report; defaults to the checkout's `HEAD`
    pub commit: Option<String>,
    /// Defaults to now
    pub generated_at: Option<DateTime<Utc>>,
}

enum UnitOutcome {
    Reasoned(Vec<ReasoningTrace>),
    Cancelled,
}

/// Ingest, analyze, verify and review over one index and calibration store.
pub struct DriftEngine {
    config: EngineConfig,
    index: Arc<MemoryIndex>,
    retriever: Retriever,
    chunker: SpecChunker,
    extractor: BehaviorExtractor,
    reasoning: ReasoningEngine,
    calibration: Arc<CalibrationStore>,
    journal: Option<Arc<TraceJournal>>,
}

impl DriftEngine {
    /// Build an engine over fresh in-memory state.
    pub fn new(config: EngineConfig, oracle: Arc<dyn ReasoningOracle>) -> Result<Self> {
        let config = config.normalized();
        config.validate()?;
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimension));
        let index = Arc::new(MemoryIndex::new(embedder));
        Self::assemble(config, oracle, index, Arc::new(CalibrationStore::new()))
    }

    /// Build an engine, loading the index and calibration history from their
    /// configured paths when those files exist.
    pub async fn open(config: EngineConfig, oracle: Arc<dyn ReasoningOracle>) -> Result<Self> {
        let config = config.normalized();
        config.validate()?;
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimension));
        let index = match &config.store_path {
            Some(path) => MemoryIndex::open(path, embedder).await?,
            None => MemoryIndex::new(embedder),
        };
        let calibration = match &config.calibration_path {
            Some(path) => CalibrationStore::open(path).await?,
            None => CalibrationStore::new(),
        };
        log::info!(
            "Opened engine: {} indexed chunks, {} calibrated buckets",
            index.len(),
            calibration.snapshot().len()
        );
        Self::assemble(config, oracle, Arc::new(index), Arc::new(calibration))
    }

    fn assemble(
        config: EngineConfig,
        oracle: Arc<dyn ReasoningOracle>,
        index: Arc<MemoryIndex>,
        calibration: Arc<CalibrationStore>,
    ) -> Result<Self> {
        let chunker = SpecChunker::new(config.chunker.clone())?;
        let retriever = Retriever::new(index.clone(), config.retriever_config());
        let reasoning = ReasoningEngine::new(oracle, config.retry_policy());
        let journal = config
            .journal_path
            .as_ref()
            .map(|path| Arc::new(TraceJournal::new(path)));
        Ok(Self {
            config,
            index,
            retriever,
            chunker,
            extractor: BehaviorExtractor::new(),
            reasoning,
            calibration,
            journal,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<MemoryIndex> {
        &self.index
    }

    pub fn calibration(&self) -> &Arc<CalibrationStore> {
        &self.calibration
    }

    /// Chunk and index every specification document of `source`.
    ///
    /// Each document replaces what the index held for it under the fork. A
    /// chunk-id collision aborts only the offending document and is reported
    /// in [`IngestOutcome::conflicts`].
    pub async fn ingest(&self, source: &IngestSource) -> Result<IngestOutcome> {
        let documents = {
            let source = source.clone();
            tokio::task::spawn_blocking(move || load_documents(&source))
                .await
                .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))??
        };
        let mut outcome = IngestOutcome::default();

        for document in documents {
            let document_id = document.document_id.clone();
            match self.ingest_document(&document).await {
                Ok(summary) => {
                    outcome.summary.merge(summary);
                    outcome.documents += 1;
                }
                Err(EngineError::Chunker(ChunkerError::EmptyDocument(_))) => {
                    log::debug!("Skipping empty document {document_id}");
                    outcome.skipped_documents.push(document_id);
                }
                Err(EngineError::VectorStore(VectorStoreError::IngestionConflict { chunk_id })) => {
                    log::warn!("Ingestion of {document_id} aborted: chunk {chunk_id} conflicts");
                    outcome.conflicts.push(IngestConflict {
                        document_id,
                        chunk_id,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.persist_index().await?;
        log::info!(
            "Ingested {} documents for fork {}: {} added, {} skipped, {} removed, {} conflicts",
            outcome.documents,
            source.fork,
            outcome.summary.chunks_added,
            outcome.summary.chunks_skipped,
            outcome.summary.chunks_removed,
            outcome.conflicts.len()
        );
        Ok(outcome)
    }

    /// Chunk and index one document. Does not persist.
    pub async fn ingest_document(&self, document: &SpecDocument) -> Result<IngestionSummary> {
        let chunks = self.chunker.chunk(document)?;
        Ok(self
            .index
            .index_document(&document.document_id, &document.fork, chunks)
            .await?)
    }

    async fn persist_index(&self) -> Result<()> {
        if let Some(path) = &self.config.store_path {
            self.index.save(path).await?;
        }
        Ok(())
    }

    /// Behavioral units of every supported file under `code_path`.
    ///
    /// Files that fail to parse are logged and listed as failures; they never
    /// abort the analysis.
    pub async fn analyze(&self, code_path: &Path, fork: &Fork) -> Result<Analysis> {
        let files = FileScanner::new(code_path, ScanTarget::Source).scan();
        if files.is_empty() {
            return Err(EngineError::NoSource(code_path.display().to_string()));
        }
        let root = if code_path.is_file() {
            code_path.parent().unwrap_or(code_path).to_path_buf()
        } else {
            code_path.to_path_buf()
        };

        let extractor = self.extractor;
        let fork = fork.clone();
        let analysis = tokio::task::spawn_blocking(move || {
            let mut analysis = Analysis {
                files: files.len(),
                ..Analysis::default()
            };
            for path in &files {
                match extractor.extract_file(&root, path, &fork) {
                    Ok(units) => analysis.units.extend(units),
                    Err(ExtractionError::EmptySource(_)) => {
                        log::debug!("Skipping empty file {}", path.display());
                    }
                    Err(e) => {
                        log::warn!("Extraction failed for {}: {e}", path.display());
                        analysis.failures.push(extraction_failure(&root, path, &e));
                    }
                }
            }
            analysis
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;

        log::info!(
            "Analyzed {} files: {} units, {} failures",
            analysis.files,
            analysis.units.len(),
            analysis.failures.len()
        );
        Ok(analysis)
    }

    pub async fn verify(
        &self,
        code_path: &Path,
        fork: &Fork,
        options: VerifyOptions,
    ) -> Result<Report> {
        self.verify_with_cancel(code_path, fork, options, &CancellationToken::new())
            .await
    }

    /// Analyze `code_path`, reason about every unit against the specification
    /// indexed for `fork`, and build the report.
    ///
    /// Cancelling stops new units from starting; units already talking to the
    /// oracle finish and keep their results. Units that never started are
    /// listed as cancelled.
    pub async fn verify_with_cancel(
        &self,
        code_path: &Path,
        fork: &Fork,
        options: VerifyOptions,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let run = Arc::new(self.retriever.begin_run(self.config.fork_scope(fork))?);
        let analysis = self.analyze(code_path, fork).await?;
        log::info!(
            "Verifying {} units against {} chunks (generation {}) with oracle {}",
            analysis.units.len(),
            run.chunk_count(),
            run.generation(),
            self.reasoning.oracle_name()
        );

        let outcomes = self.reason_units(&analysis.units, &run, cancel).await;

        let mut traces = Vec::new();
        let mut unevaluated = analysis.failures.clone();
        for (unit, outcome) in analysis.units.iter().zip(outcomes) {
            match outcome {
                Some(UnitOutcome::Reasoned(unit_traces)) => traces.extend(unit_traces),
                Some(UnitOutcome::Cancelled) => unevaluated.push(UnevaluatedUnit::new(
                    &unit.id,
                    unit.source_location.clone(),
                    UnevaluatedReason::Cancelled,
                )),
                None => unevaluated.push(
                    UnevaluatedUnit::new(
                        &unit.id,
                        unit.source_location.clone(),
                        UnevaluatedReason::OracleUnavailable,
                    )
                    .with_detail("worker task failed"),
                ),
            }
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(fork, &traces).await {
                log::warn!("Cannot journal traces to {}: {e}", journal.path().display());
            }
        }

        let units: BTreeMap<String, BehavioralUnit> = analysis
            .units
            .iter()
            .map(|unit| (unit.id.clone(), unit.clone()))
            .collect();
        let comparator = Comparator::new(self.calibration.clone(), self.config.disagreement_policy);
        let comparison = comparator.compare(&traces, &units, |id| run.chunk(id));
        unevaluated.extend(comparison.unevaluated);

        let meta = RunMetadata {
            fork: fork.clone(),
            commit: options.commit.or_else(|| git::git_head(code_path)),
            generated_at: options.generated_at.unwrap_or_else(Utc::now),
        };
        let report = Report::generate(
            meta,
            RunOutcome {
                units_analyzed: analysis.units.len(),
                compliant: comparison.compliant.len(),
                findings: comparison.findings,
                unevaluated,
            },
        );
        log::info!("{}", report.summary_line());
        Ok(report)
    }

    /// One outcome per unit, in unit order; `None` where the worker died.
    async fn reason_units(
        &self,
        units: &[BehavioralUnit],
        run: &Arc<RetrievalRun>,
        cancel: &CancellationToken,
    ) -> Vec<Option<UnitOutcome>> {
        let limiter = UnitLimiter::new(self.config.concurrency);
        let top_k = self.config.top_k;
        let samples = self.config.samples_per_unit;
        let mut workers = JoinSet::new();

        for (position, unit) in units.iter().enumerate() {
            let unit = unit.clone();
            let run = run.clone();
            let limiter = limiter.clone();
            let reasoning = self.reasoning.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let Some(_permit) = limiter.acquire().await else {
                    log::debug!("Skipping {}: run cancelled", unit.id);
                    return (position, UnitOutcome::Cancelled);
                };
                if cancel.is_cancelled() {
                    log::debug!("Skipping {}: run cancelled", unit.id);
                    limiter.close();
                    return (position, UnitOutcome::Cancelled);
                }
                let retrieval = match run.retrieve(&unit, top_k).await {
                    Ok(retrieval) => retrieval,
                    Err(e) => {
                        log::warn!("Retrieval failed for {}: {e}", unit.id);
                        RetrievalResult::empty(&unit.id)
                    }
                };
                let prompt = StructuredPrompt::build(&unit, &retrieval, |id| run.chunk(id));
                let mut traces = Vec::with_capacity(samples);
                for sample in 0..samples {
                    traces.push(reasoning.reason(prompt.clone(), sample).await);
                }
                (position, UnitOutcome::Reasoned(traces))
            });
        }

        let mut outcomes: Vec<Option<UnitOutcome>> = units.iter().map(|_| None).collect();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((position, outcome)) => outcomes[position] = Some(outcome),
                Err(e) => log::warn!("Unit worker failed: {e}"),
            }
        }
        outcomes
    }

    /// Apply a human decision to one finding of `report` and fold it into the
    /// calibration history, persisting the history when a path is configured.
    pub async fn review(
        &self,
        report: &mut Report,
        finding_id: &str,
        decision: ReviewDecision,
    ) -> Result<FindingStatus> {
        let desk = ReviewDesk::new(self.calibration.clone());
        let status = desk.apply_by_id(&mut report.findings, finding_id, decision)?;
        if let Some(path) = &self.config.calibration_path {
            self.calibration.save(path).await?;
        }
        Ok(status)
    }
}

/// Blocking: runs git subprocesses and reads the working tree.
fn load_documents(source: &IngestSource) -> Result<Vec<SpecDocument>> {
    let mut documents = Vec::new();
    match &source.git_ref {
        Some(rev) => {
            for name in git::list_files_at(&source.repo, rev)? {
                if !ScanTarget::Specification.accepts(Path::new(&name)) {
                    continue;
                }
                let text = git::read_file_at(&source.repo, rev, &name)?;
                documents.push(SpecDocument::new(name, source.fork.clone(), text));
            }
        }
        None => {
            for path in FileScanner::new(&source.repo, ScanTarget::Specification).scan() {
                let text = match std::fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("Skipping unreadable document {}: {e}", path.display());
                        continue;
                    }
                };
                let document_id = relative_id(&source.repo, &path);
                documents.push(SpecDocument::new(document_id, source.fork.clone(), text));
            }
        }
    }
    if documents.is_empty() {
        return Err(EngineError::NoSource(source.repo.display().to_string()));
    }
    Ok(documents)
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = if root.is_file() {
        path.file_name().map(Path::new).unwrap_or(path)
    } else {
        path.strip_prefix(root).unwrap_or(path)
    };
    relative.to_string_lossy().replace('\\', "/")
}

fn extraction_failure(root: &Path, path: &Path, error: &ExtractionError) -> UnevaluatedUnit {
    let file = relative_id(root, path);
    let line = match error {
        ExtractionError::Syntax { line, .. } => *line,
        _ => 1,
    };
    let location = SourceLocation {
        path: file.clone(),
        line_start: line,
        line_end: line,
        symbol: String::new(),
    };
    UnevaluatedUnit::new(file, location, UnevaluatedReason::ExtractionFailed)
        .with_detail(error.to_string())
}
