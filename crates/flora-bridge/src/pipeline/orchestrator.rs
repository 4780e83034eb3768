//! Pipeline orchestrator
//!
//! Runs a [`StepSelection`] in order against one [`Database`]. Each step's
//! writes are committed as they happen; the first failure stops the run and
//! the operator resumes by selecting the failed step again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::catalogue::StepId;
use super::selection::StepSelection;
use crate::bridge::{counts, graft, link, literals, paths, populate, schema, sources, stage, synonyms};
use crate::bridge::schema::DdlAsset;
use crate::config::Config;
use crate::db::Database;
use crate::error::{BridgeError, BridgeResult};
use crate::models::SourceKind;

/// One finished step
#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub step: StepId,
    pub rows: u64,
    pub duration: Duration,
}

/// Result of a pipeline run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: Vec<StepSummary>,
    /// The step that failed, if any; steps after it were not attempted
    pub failed: Option<StepId>,
    #[serde(skip)]
    pub error: Option<BridgeError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    /// Turn a failed run into a [`BridgeError::StepFailed`]
    pub fn into_result(self) -> BridgeResult<Vec<StepSummary>> {
        match (self.failed, self.error) {
            (Some(step), Some(source)) => Err(BridgeError::StepFailed {
                step,
                source: Box::new(source),
            }),
            _ => Ok(self.completed),
        }
    }
}

pub struct Orchestrator<'a> {
    db: &'a mut Database,
    config: &'a Config,
}

impl<'a> Orchestrator<'a> {
    pub fn new(db: &'a mut Database, config: &'a Config) -> Self {
        Self { db, config }
    }

    /// Execute `selection` in order, stopping at the first failure
    pub async fn run(&mut self, selection: &StepSelection) -> RunReport {
        let started_at = Utc::now();
        let names: Vec<&str> = selection.steps().iter().map(|s| s.name()).collect();
        info!(steps = ?names, "Starting bridging run");

        let skipped = selection.unselected_dependencies();
        if !skipped.is_empty() {
            let skipped: Vec<&str> = skipped.iter().map(|s| s.name()).collect();
            warn!(dependencies = ?skipped, "Prerequisite steps not selected; assuming they ran earlier");
        }

        let mut completed = Vec::with_capacity(selection.len());
        for (index, step) in selection.steps().iter().copied().enumerate() {
            info!(
                "▶ Step {} / {}: {} - {}",
                index + 1,
                selection.len(),
                step,
                step.description()
            );

            let started = Instant::now();
            match self.execute(step).await {
                Ok(rows) => {
                    let duration = started.elapsed();
                    info!(
                        step = step.name(),
                        rows,
                        duration_secs = duration.as_secs_f64(),
                        "✓ Step {} complete",
                        step
                    );
                    completed.push(StepSummary {
                        step,
                        rows,
                        duration,
                    });
                },
                Err(e) => {
                    error!(
                        step = step.name(),
                        duration_secs = started.elapsed().as_secs_f64(),
                        error = %e,
                        "✗ Step {} failed; remaining steps skipped",
                        step
                    );
                    return RunReport {
                        started_at,
                        finished_at: Utc::now(),
                        completed,
                        failed: Some(step),
                        error: Some(e),
                    };
                },
            }
        }

        info!(steps = completed.len(), "Bridging run finished");
        RunReport {
            started_at,
            finished_at: Utc::now(),
            completed,
            failed: None,
            error: None,
        }
    }

    /// Dispatch one catalogue step, returning rows changed
    pub async fn execute(&mut self, step: StepId) -> BridgeResult<u64> {
        let db = &mut *self.db;
        let config = self.config;

        match step {
            StepId::PrepareSourceA => prepare(config, SourceKind::A),
            StepId::PrepareSourceB => prepare(config, SourceKind::B),
            StepId::ResetSchema => schema::apply(db, config, DdlAsset::Schema).await,
            StepId::ImportA => stage::import(db, config, SourceKind::A).await,
            StepId::ImportB => stage::import(db, config, SourceKind::B).await,
            StepId::PopulateA => populate::populate(db, config, SourceKind::A).await,
            StepId::PopulateB => populate::populate(db, config, SourceKind::B).await,
            StepId::BuildStructuralIndexes => {
                schema::apply(db, config, DdlAsset::StructuralIndexes).await
            },
            StepId::LinkAParents => link::link_a_parents(db, config).await,
            StepId::ResolveBHierarchy => link::resolve_b_hierarchy(db, config).await,
            StepId::GraftRoots => graft::graft_roots(db, config).await,
            StepId::DereferenceSynonyms => synonyms::dereference_synonyms(db, config).await,
            StepId::FlowLiterals => literals::flow_literals(db, config).await,
            StepId::BuildPaths => paths::build_paths(db, config).await,
            StepId::ComputeCounts => counts::compute_counts(db, config).await,
            StepId::OptimizeIndexes => {
                schema::apply(db, config, DdlAsset::ProductionIndexes).await
            },
        }
    }
}

fn prepare(config: &Config, kind: SourceKind) -> BridgeResult<u64> {
    sources::prepare(kind, config.source(kind)).map(|prepared| prepared.rows)
}
