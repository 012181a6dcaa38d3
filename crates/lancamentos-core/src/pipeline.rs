//! End-to-end run of one batch:
//! `Received -> Validated -> Staged -> DimensionsResolved -> FactsLoaded -> Done`.
//!
//! Each phase commits on its own. A failure stops the run and reports the
//! state it was trying to reach; phases committed before it stay in place
//! and can be completed with [`Pipeline::rerun_from_staging`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::EtlConfig;
use crate::dimensions::{self, DimensionReport};
use crate::error::EtlError;
use crate::facts::{self, FactReport};
use crate::ingestion::{self, Batch};
use crate::staging;
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Received,
    Validated,
    Staged,
    DimensionsResolved,
    FactsLoaded,
    Done,
    Failed,
}

impl RunState {
    pub fn next(&self) -> Option<RunState> {
        match self {
            RunState::Received => Some(RunState::Validated),
            RunState::Validated => Some(RunState::Staged),
            RunState::Staged => Some(RunState::DimensionsResolved),
            RunState::DimensionsResolved => Some(RunState::FactsLoaded),
            RunState::FactsLoaded => Some(RunState::Done),
            RunState::Done | RunState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Received => "received",
            RunState::Validated => "validated",
            RunState::Staged => "staged",
            RunState::DimensionsResolved => "dimensions_resolved",
            RunState::FactsLoaded => "facts_loaded",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub batch_id: Uuid,
    pub source: String,
    pub state: RunState,
    pub history: Vec<RunState>,
    pub rows_received: usize,
    pub rows_staged: Option<u64>,
    pub dimensions: Option<DimensionReport>,
    pub facts: Option<FactReport>,
}

#[derive(Debug, Error)]
#[error("run {} failed before reaching {failed_at}: {source}", .report.batch_id)]
pub struct RunError {
    pub failed_at: RunState,
    #[source]
    pub source: EtlError,
    /// Progress made before the failure.
    pub report: RunReport,
}

struct Run {
    report: RunReport,
}

impl Run {
    fn start(batch_id: Uuid, source: &str, state: RunState) -> Self {
        Self {
            report: RunReport {
                batch_id,
                source: source.to_string(),
                state,
                history: vec![state],
                rows_received: 0,
                rows_staged: None,
                dimensions: None,
                facts: None,
            },
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.report.state.next() {
            self.report.state = next;
            self.report.history.push(next);
            info!(state = %next, "Run advanced");
        }
    }

    fn finish(mut self) -> RunReport {
        self.advance();
        info!("ETL run completed");
        self.report
    }

    fn fail(mut self, source: EtlError) -> RunError {
        let failed_at = self.report.state.next().unwrap_or(RunState::Failed);
        self.report.state = RunState::Failed;
        self.report.history.push(RunState::Failed);
        error!(failed_at = %failed_at, error = %source, "ETL run failed");
        RunError {
            failed_at,
            source,
            report: self.report,
        }
    }
}

pub struct Pipeline<'a, W: ?Sized> {
    warehouse: &'a W,
    config: &'a EtlConfig,
}

impl<'a, W> Pipeline<'a, W>
where
    W: Warehouse + ?Sized,
{
    pub fn new(warehouse: &'a W, config: &'a EtlConfig) -> Self {
        Self { warehouse, config }
    }

    /// Validates, stages and loads one CSV file.
    pub async fn run_file(&self, source: &str, contents: &[u8]) -> Result<RunReport, RunError> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("etl_run", batch_id = %batch_id, source = %source);

        async {
            info!(bytes = contents.len(), "Batch received");
            let mut run = Run::start(batch_id, source, RunState::Received);

            let batch = match ingestion::read_batch(source, contents) {
                Ok(batch) => batch,
                Err(err) => return Err(run.fail(err)),
            };
            run.report.rows_received = batch.len();
            run.advance();

            self.load(run, &batch).await
        }
        .instrument(span)
        .await
    }

    /// Stages and loads an already validated batch.
    pub async fn run_batch(&self, batch: &Batch) -> Result<RunReport, RunError> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("etl_run", batch_id = %batch_id, source = %batch.source);

        async {
            let mut run = Run::start(batch_id, &batch.source, RunState::Validated);
            run.report.rows_received = batch.len();
            self.load(run, batch).await
        }
        .instrument(span)
        .await
    }

    /// Resolves dimensions and facts against whatever staging currently
    /// holds, for completing a run that failed after staging.
    pub async fn rerun_from_staging(&self) -> Result<RunReport, RunError> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("etl_run", batch_id = %batch_id, source = "staging");

        async {
            let run = Run::start(batch_id, "staging", RunState::Staged);
            self.resolve_and_load(run).await
        }
        .instrument(span)
        .await
    }

    async fn load(&self, mut run: Run, batch: &Batch) -> Result<RunReport, RunError> {
        match staging::replace_staging(self.warehouse, batch, self.config.staging_chunk_size).await {
            Ok(staged) => run.report.rows_staged = Some(staged),
            Err(err) => return Err(run.fail(err)),
        }
        run.advance();

        self.resolve_and_load(run).await
    }

    async fn resolve_and_load(&self, mut run: Run) -> Result<RunReport, RunError> {
        match dimensions::resolve_dimensions(self.warehouse).await {
            Ok(report) => run.report.dimensions = Some(report),
            Err(err) => return Err(run.fail(err)),
        }
        run.advance();

        match facts::load_facts(self.warehouse).await {
            Ok(report) => run.report.facts = Some(report),
            Err(err) => return Err(run.fail(err)),
        }
        run.advance();

        Ok(run.finish())
    }
}
