//! Pipeline Orchestrator: runs stages one at a time in dependency order.
//!
//! A stage starts only when each dependency succeeded, partially succeeded or
//! is disabled. A stage that fails outright blocks its dependents; stages that
//! do not depend on it still run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use eokg_common::StagesConfig;

use crate::stages::{Stage, StageContext, StageId, StageReport};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Stage {stage} depends on {missing}, which is not registered")]
    MissingDependency { stage: StageId, missing: StageId },

    #[error("Stage {0} is registered twice")]
    DuplicateStage(StageId),

    #[error("Unknown stage name: {0}")]
    UnknownStage(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageStatus {
    Succeeded,
    /// Some batches failed or were skipped; the rest committed.
    Partial,
    Failed(String),
    /// Not run because a dependency failed or was itself blocked.
    Blocked { by: StageId },
    Disabled,
}

impl StageStatus {
    /// Dependents may start.
    pub fn satisfies(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Partial | StageStatus::Disabled)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Succeeded => write!(f, "ok"),
            StageStatus::Partial => write!(f, "partial"),
            StageStatus::Failed(_) => write!(f, "FAILED"),
            StageStatus::Blocked { by } => write!(f, "blocked:{by}"),
            StageStatus::Disabled => write!(f, "disabled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: StageId,
    pub status: StageStatus,
    pub report: StageReport,
}

/// Final report of a run, one row per registered stage in execution order.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<StageOutcome>,
}

impl RunSummary {
    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    pub fn status(&self, stage: StageId) -> Option<&StageStatus> {
        self.outcome(stage).map(|o| &o.status)
    }

    pub fn total_created(&self) -> u64 {
        self.outcomes.iter().map(|o| o.report.created).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, StageStatus::Succeeded | StageStatus::Disabled))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        writeln!(f, "Run finished in {}.{:03}s", elapsed.num_seconds(), elapsed.num_milliseconds() % 1000)?;
        writeln!(
            f,
            "{:<26} {:<24} {:>9} {:>9} {:>7} {:>10} {:>8} {:>9}",
            "stage", "status", "created", "matched", "failed", "unresolved", "skipped", "malformed"
        )?;
        for o in &self.outcomes {
            let r = &o.report;
            writeln!(
                f,
                "{:<26} {:<24} {:>9} {:>9} {:>7} {:>10} {:>8} {:>9}",
                o.stage.name(),
                o.status.to_string(),
                r.created,
                r.matched,
                r.failed,
                r.unresolved,
                r.skipped,
                r.malformed
            )?;
        }
        for o in &self.outcomes {
            if let StageStatus::Failed(reason) = &o.status {
                writeln!(f, "{}: {reason}", o.stage)?;
            }
            for failure in &o.report.failures {
                writeln!(
                    f,
                    "{}: batch {} (records {}..{}) {:?}: {}",
                    o.stage, failure.batch, failure.offsets.start, failure.offsets.end, failure.kind, failure.message
                )?;
            }
        }
        Ok(())
    }
}

pub struct Orchestrator {
    /// Registered stages in execution order.
    stages: Vec<Box<dyn Stage>>,
    flags: StagesConfig,
    only: Option<BTreeSet<StageId>>,
}

impl Orchestrator {
    /// Register `stages` in dependency order.
    pub fn new(stages: Vec<Box<dyn Stage>>, flags: StagesConfig) -> Result<Self, OrchestratorError> {
        for name in flags.names() {
            if StageId::from_name(name).is_none() {
                return Err(OrchestratorError::UnknownStage(name.to_string()));
            }
        }

        let mut by_id: BTreeMap<StageId, Box<dyn Stage>> = BTreeMap::new();
        for stage in stages {
            let id = stage.id();
            if by_id.insert(id, stage).is_some() {
                return Err(OrchestratorError::DuplicateStage(id));
            }
        }

        let ids: Vec<StageId> = by_id.keys().copied().collect();
        let ordered = execution_order(&ids)?
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect();

        Ok(Self {
            stages: ordered,
            flags,
            only: None,
        })
    }

    /// Run only these stages; every other stage counts as disabled.
    pub fn only(mut self, stages: impl IntoIterator<Item = StageId>) -> Self {
        self.only = Some(stages.into_iter().collect());
        self
    }

    pub fn plan(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    fn enabled(&self, id: StageId) -> bool {
        self.flags.is_enabled(id.name()) && self.only.as_ref().map_or(true, |only| only.contains(&id))
    }

    /// Run every stage. Never fails: problems end up in the summary.
    pub async fn run(&self, mut ctx: StageContext) -> RunSummary {
        let started_at = Utc::now();
        if let Some(secs) = ctx.settings.run_timeout_secs {
            ctx.deadline = Some(Instant::now() + Duration::from_secs(secs));
        }

        let mut statuses: HashMap<StageId, StageStatus> = HashMap::new();
        let mut outcomes = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let id = stage.id();
            let blocker = id
                .deps()
                .iter()
                .find(|dep| !statuses.get(*dep).is_some_and(StageStatus::satisfies))
                .copied();

            let (status, report) = if !self.enabled(id) {
                info!(stage = %id, "Stage disabled");
                (StageStatus::Disabled, StageReport::default())
            } else if let Some(by) = blocker {
                warn!(stage = %id, blocked_by = %by, "Stage blocked by failed dependency");
                (StageStatus::Blocked { by }, StageReport::default())
            } else {
                info!(stage = %id, "Stage starting");
                let timer = Instant::now();
                match stage.run(&ctx).await {
                    Ok(report) => {
                        let status = classify(&report);
                        info!(
                            stage = %id,
                            %status,
                            created = report.created,
                            matched = report.matched,
                            failed = report.failed,
                            unresolved = report.unresolved,
                            skipped = report.skipped,
                            malformed = report.malformed,
                            elapsed_ms = timer.elapsed().as_millis() as u64,
                            "Stage finished"
                        );
                        (status, report)
                    }
                    Err(e) => {
                        warn!(stage = %id, error = %e, "Stage failed");
                        (StageStatus::Failed(e.to_string()), StageReport::default())
                    }
                }
            };

            statuses.insert(id, status.clone());
            outcomes.push(StageOutcome { stage: id, status, report });
        }

        RunSummary {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        }
    }
}

/// Order `ids` so every dependency comes first (Kahn's algorithm). The ready
/// set is ordered, so ties keep pipeline order and the plan is deterministic.
pub fn execution_order(ids: &[StageId]) -> Result<Vec<StageId>, OrchestratorError> {
    let registered: BTreeSet<StageId> = ids.iter().copied().collect();
    let mut waiting: HashMap<StageId, usize> = HashMap::new();
    let mut dependents: HashMap<StageId, Vec<StageId>> = HashMap::new();
    for &id in &registered {
        for &dep in id.deps() {
            if !registered.contains(&dep) {
                return Err(OrchestratorError::MissingDependency { stage: id, missing: dep });
            }
            dependents.entry(dep).or_default().push(id);
        }
        waiting.insert(id, id.deps().len());
    }

    let mut ready: BTreeSet<StageId> = waiting.iter().filter(|(_, n)| **n == 0).map(|(id, _)| *id).collect();
    let mut ordered = Vec::with_capacity(registered.len());
    while let Some(id) = ready.pop_first() {
        ordered.push(id);
        for next in dependents.get(&id).into_iter().flatten() {
            if let Some(n) = waiting.get_mut(next) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*next);
                }
            }
        }
    }
    Ok(ordered)
}

/// Batch-level failures make a stage partial, unless the store was never
/// reachable, which fails it.
fn classify(report: &StageReport) -> StageStatus {
    if report.connectivity_lost() {
        StageStatus::Failed("store unreachable, nothing committed".to_string())
    } else if report.failed > 0 || report.skipped > 0 {
        StageStatus::Partial
    } else {
        StageStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use eokg_common::{IngestError, IngestSettings, PathsConfig};
    use eokg_graph::{BatchFailure, FailureKind, MemoryStore};

    use crate::stages::StageError;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ok,
        Partial,
        Unavailable,
        Disconnected,
    }

    struct ScriptedStage {
        id: StageId,
        behaviour: Behaviour,
        log: Arc<Mutex<Vec<StageId>>>,
    }

    #[async_trait]
    impl Stage for ScriptedStage {
        fn id(&self) -> StageId {
            self.id
        }

        async fn run(&self, _ctx: &StageContext) -> Result<StageReport, StageError> {
            self.log.lock().unwrap().push(self.id);
            let failure = |kind| BatchFailure {
                batch: 1,
                offsets: 100..200,
                kind,
                message: "boom".into(),
            };
            match self.behaviour {
                Behaviour::Ok => Ok(StageReport {
                    created: 1,
                    batches_committed: 1,
                    ..Default::default()
                }),
                Behaviour::Partial => Ok(StageReport {
                    created: 150,
                    failed: 100,
                    batches_committed: 2,
                    failures: vec![failure(FailureKind::Malformed)],
                    ..Default::default()
                }),
                Behaviour::Unavailable => Err(IngestError::unavailable("input.json", "No such file").into()),
                Behaviour::Disconnected => Ok(StageReport {
                    failed: 100,
                    failures: vec![failure(FailureKind::Connectivity)],
                    ..Default::default()
                }),
            }
        }
    }

    fn all_stages(overrides: &[(StageId, Behaviour)], log: &Arc<Mutex<Vec<StageId>>>) -> Vec<Box<dyn Stage>> {
        // Registered in reverse to prove ordering comes from dependencies.
        StageId::ALL
            .iter()
            .rev()
            .map(|&id| {
                let behaviour = overrides
                    .iter()
                    .find(|(s, _)| *s == id)
                    .map(|(_, b)| *b)
                    .unwrap_or(Behaviour::Ok);
                Box::new(ScriptedStage {
                    id,
                    behaviour,
                    log: log.clone(),
                }) as Box<dyn Stage>
            })
            .collect()
    }

    fn context() -> StageContext {
        StageContext::new(Arc::new(MemoryStore::new()), IngestSettings::default(), PathsConfig::default())
    }

    #[tokio::test]
    async fn runs_every_stage_after_its_dependencies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Orchestrator::new(all_stages(&[], &log), StagesConfig::default()).unwrap();
        let summary = orchestrator.run(context()).await;

        let ran = log.lock().unwrap().clone();
        assert_eq!(ran.len(), StageId::ALL.len());
        for (i, id) in ran.iter().enumerate() {
            for dep in id.deps() {
                let pos = ran.iter().position(|s| s == dep).unwrap();
                assert!(pos < i, "{id} ran before {dep}");
            }
        }
        assert!(summary.is_clean());
        assert_eq!(summary.total_created(), StageId::ALL.len() as u64);
    }

    #[tokio::test]
    async fn failed_collect_blocks_only_its_descendants() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages = all_stages(&[(StageId::Collect, Behaviour::Unavailable)], &log);
        let summary = Orchestrator::new(stages, StagesConfig::default())
            .unwrap()
            .run(context())
            .await;

        assert!(matches!(summary.status(StageId::Collect), Some(StageStatus::Failed(_))));
        assert_eq!(
            summary.status(StageId::DatasetNodes),
            Some(&StageStatus::Blocked { by: StageId::Collect })
        );
        assert_eq!(
            summary.status(StageId::PublicationDataset),
            Some(&StageStatus::Blocked { by: StageId::DatasetNodes })
        );
        assert!(matches!(summary.status(StageId::FastRp), Some(StageStatus::Blocked { .. })));
        assert_eq!(summary.status(StageId::PublicationNodes), Some(&StageStatus::Succeeded));
        assert_eq!(summary.status(StageId::PublicationCitations), Some(&StageStatus::Succeeded));
        assert_eq!(summary.status(StageId::PublicationResearchArea), Some(&StageStatus::Succeeded));
    }

    #[tokio::test]
    async fn batch_failures_are_partial_and_do_not_block() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages = all_stages(&[(StageId::PublicationNodes, Behaviour::Partial)], &log);
        let summary = Orchestrator::new(stages, StagesConfig::default())
            .unwrap()
            .run(context())
            .await;

        assert_eq!(summary.status(StageId::PublicationNodes), Some(&StageStatus::Partial));
        assert_eq!(summary.status(StageId::PublicationCitations), Some(&StageStatus::Succeeded));
        assert!(!summary.is_clean());

        let table = summary.to_string();
        assert!(table.contains("publication_nodes"));
        assert!(table.contains("batch 1 (records 100..200)"));
    }

    #[tokio::test]
    async fn unreachable_store_with_nothing_committed_is_fatal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages = all_stages(&[(StageId::KeywordNodes, Behaviour::Disconnected)], &log);
        let summary = Orchestrator::new(stages, StagesConfig::default())
            .unwrap()
            .run(context())
            .await;

        assert!(matches!(summary.status(StageId::KeywordNodes), Some(StageStatus::Failed(_))));
        assert_eq!(
            summary.status(StageId::DatasetKeyword),
            Some(&StageStatus::Blocked { by: StageId::KeywordNodes })
        );
    }

    #[tokio::test]
    async fn disabled_stages_satisfy_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut flags = StagesConfig::default();
        flags.set("collect", false);
        let summary = Orchestrator::new(all_stages(&[], &log), flags)
            .unwrap()
            .run(context())
            .await;

        assert_eq!(summary.status(StageId::Collect), Some(&StageStatus::Disabled));
        assert_eq!(summary.status(StageId::DatasetNodes), Some(&StageStatus::Succeeded));
        assert!(!log.lock().unwrap().contains(&StageId::Collect));
    }

    #[tokio::test]
    async fn only_runs_the_selected_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let summary = Orchestrator::new(all_stages(&[], &log), StagesConfig::default())
            .unwrap()
            .only([StageId::PublicationNodes, StageId::PublicationCitations])
            .run(context())
            .await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![StageId::PublicationNodes, StageId::PublicationCitations]
        );
        assert_eq!(summary.status(StageId::PageRank), Some(&StageStatus::Disabled));
    }

    #[test]
    fn rejects_missing_dependencies_and_unknown_flags() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let only_edges: Vec<Box<dyn Stage>> = vec![Box::new(ScriptedStage {
            id: StageId::PublicationCitations,
            behaviour: Behaviour::Ok,
            log: log.clone(),
        })];
        assert!(matches!(
            Orchestrator::new(only_edges, StagesConfig::default()),
            Err(OrchestratorError::MissingDependency {
                missing: StageId::PublicationNodes,
                ..
            })
        ));

        let mut flags = StagesConfig::default();
        flags.set("pagerank", false);
        assert!(matches!(
            Orchestrator::new(all_stages(&[], &log), flags),
            Err(OrchestratorError::UnknownStage(_))
        ));
    }

    #[test]
    fn plan_lists_collect_first_and_analytics_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let plan = Orchestrator::new(all_stages(&[], &log), StagesConfig::default())
            .unwrap()
            .plan();
        assert_eq!(plan.first(), Some(&StageId::Collect));
        assert_eq!(plan.last(), Some(&StageId::FastRp));
    }
}
