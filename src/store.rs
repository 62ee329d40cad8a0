//! C7: Queue & State Store Adapter.
//!
//! Narrow interface consumed by the tier analyzers (C5) and the scheduler
//! (C6), per spec §4.7. A real deployment implements [`StateStore`] against
//! PostgreSQL with parameterized queries; [`InMemoryStateStore`] is the
//! reference adapter used by tests and as a starting point for an embedder
//! wiring this crate into their own persistence layer.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{AnalysisArtifact, Job, JobId, Tier, TierCompletion, TierState};
use crate::error::{PipelineError, PipelineResult};

/// Snapshot of how many jobs are sitting at each stage of the pipeline, per
/// spec §4.7's `get_processing_status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStatus {
    /// Jobs with tier 1 not yet complete.
    pub pending_t1: usize,
    /// Jobs with tier 1 complete but tier 2 not yet complete.
    pub pending_t2: usize,
    /// Jobs with tier 2 complete but tier 3 not yet complete.
    pub pending_t3: usize,
    /// Jobs with all three tiers complete.
    pub fully_analyzed: usize,
}

/// The queue/state-store seam the core reads and writes through. The core
/// never touches a database directly — every persistence operation, from job
/// lookup to artifact storage, goes through this trait.
///
/// `#[automock]` (test-only) generates `MockStateStore`, used where
/// [`InMemoryStateStore`] can't express per-call failure injection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Jobs eligible for `tier` (prerequisite complete, `tier` itself not
    /// yet complete), newest-created first, capped at `limit`.
    async fn jobs_needing_tier(&self, tier: Tier, limit: usize) -> PipelineResult<Vec<JobId>>;

    /// Load a job by id. `Ok(None)` if the id is unknown (e.g. it was
    /// removed by the external collaborator between query and fetch).
    async fn load_job(&self, id: &JobId) -> PipelineResult<Option<Job>>;

    /// Load a previously persisted tier artifact for `id`, if one exists.
    async fn load_tier_artifact(&self, id: &JobId, tier: Tier) -> PipelineResult<Option<AnalysisArtifact>>;

    /// Atomically record a tier's completion metadata and persist its
    /// artifact. Per spec §4.7: "either both take effect or neither."
    async fn record_tier_completion(
        &self,
        id: &JobId,
        tier: Tier,
        completion: TierCompletion,
        artifact: AnalysisArtifact,
    ) -> PipelineResult<()>;

    /// Aggregate counts across every job known to the store.
    async fn processing_status(&self) -> PipelineResult<ProcessingStatus>;
}

#[derive(Debug, Clone, Default)]
struct JobRecord {
    job: Job,
    state: TierState,
    artifacts: HashMap<u8, AnalysisArtifact>,
}

/// Reference [`StateStore`] implementation: an in-process map guarded by one
/// `RwLock`, so `record_tier_completion`'s pairwise write is atomic by
/// construction (a single lock acquisition covers both mutations).
#[derive(Default)]
pub struct InMemoryStateStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryStateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with jobs, all starting at tier-1-pending. Intended for
    /// tests and for bootstrapping a process from an external job feed.
    pub async fn seed(&self, jobs: impl IntoIterator<Item = Job>) {
        let mut records = self.records.write().await;
        for job in jobs {
            records.insert(
                job.id.clone(),
                JobRecord {
                    job,
                    state: TierState::default(),
                    artifacts: HashMap::new(),
                },
            );
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn jobs_needing_tier(&self, tier: Tier, limit: usize) -> PipelineResult<Vec<JobId>> {
        let records = self.records.read().await;
        let mut ids: Vec<JobId> = records
            .values()
            .filter(|r| r.state.is_pending(tier))
            .map(|r| r.job.id.clone())
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    async fn load_job(&self, id: &JobId) -> PipelineResult<Option<Job>> {
        Ok(self.records.read().await.get(id).map(|r| r.job.clone()))
    }

    async fn load_tier_artifact(&self, id: &JobId, tier: Tier) -> PipelineResult<Option<AnalysisArtifact>> {
        Ok(self
            .records
            .read()
            .await
            .get(id)
            .and_then(|r| r.artifacts.get(&tier.number()).cloned()))
    }

    async fn record_tier_completion(
        &self,
        id: &JobId,
        tier: Tier,
        completion: TierCompletion,
        artifact: AnalysisArtifact,
    ) -> PipelineResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::persistence_failed(format!("unknown job id: {id}")))?;
        record.state.record(tier, completion);
        record.artifacts.insert(tier.number(), artifact);
        Ok(())
    }

    async fn processing_status(&self) -> PipelineResult<ProcessingStatus> {
        let records = self.records.read().await;
        let mut status = ProcessingStatus::default();
        for record in records.values() {
            if record.state.is_pending(Tier::Tier1) {
                status.pending_t1 += 1;
            } else if record.state.is_pending(Tier::Tier2) {
                status.pending_t2 += 1;
            } else if record.state.is_pending(Tier::Tier3) {
                status.pending_t3 += 1;
            } else {
                status.fully_analyzed += 1;
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            title: "SWE".to_string(),
            description: "desc".repeat(20),
            company: "Acme".to_string(),
        }
    }

    #[tokio::test]
    async fn seeded_jobs_are_pending_tier1_only() {
        let store = InMemoryStateStore::new();
        store.seed([job("a"), job("b")]).await;

        let pending_t1 = store.jobs_needing_tier(Tier::Tier1, 10).await.unwrap();
        assert_eq!(pending_t1.len(), 2);
        let pending_t2 = store.jobs_needing_tier(Tier::Tier2, 10).await.unwrap();
        assert!(pending_t2.is_empty());
    }

    #[tokio::test]
    async fn recording_tier1_unblocks_tier2_and_persists_artifact() {
        let store = InMemoryStateStore::new();
        store.seed([job("a")]).await;

        let artifact = AnalysisArtifact::Tier1(crate::domain::Tier1Artifact {
            authenticity_check: crate::domain::AuthenticityCheck {
                title_matches_role: true,
                is_authentic: true,
            },
            classification: crate::domain::Classification {
                industry: "tech".to_string(),
                sub_industry: None,
                job_function: None,
                seniority_level: None,
            },
            structured_data: crate::domain::StructuredData::default(),
        });

        let mut completion = TierCompletion::pending();
        completion.completed = true;
        store
            .record_tier_completion(&"a".to_string(), Tier::Tier1, completion, artifact)
            .await
            .unwrap();

        let pending_t2 = store.jobs_needing_tier(Tier::Tier2, 10).await.unwrap();
        assert_eq!(pending_t2, vec!["a".to_string()]);

        let loaded = store
            .load_tier_artifact(&"a".to_string(), Tier::Tier1)
            .await
            .unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn processing_status_buckets_jobs_by_furthest_completed_tier() {
        let store = InMemoryStateStore::new();
        store.seed([job("a"), job("b")]).await;

        let mut completion = TierCompletion::pending();
        completion.completed = true;
        store
            .record_tier_completion(
                &"a".to_string(),
                Tier::Tier1,
                completion.clone(),
                AnalysisArtifact::Tier1(crate::domain::Tier1Artifact {
                    authenticity_check: crate::domain::AuthenticityCheck {
                        title_matches_role: true,
                        is_authentic: true,
                    },
                    classification: crate::domain::Classification {
                        industry: "tech".to_string(),
                        sub_industry: None,
                        job_function: None,
                        seniority_level: None,
                    },
                    structured_data: crate::domain::StructuredData::default(),
                }),
            )
            .await
            .unwrap();

        let status = store.processing_status().await.unwrap();
        assert_eq!(status.pending_t1, 1); // job "b"
        assert_eq!(status.pending_t2, 1); // job "a"
        assert_eq!(status.fully_analyzed, 0);
    }

    #[tokio::test]
    async fn recording_unknown_job_fails_without_mutating_state() {
        let store = InMemoryStateStore::new();
        let mut completion = TierCompletion::pending();
        completion.completed = true;
        let result = store
            .record_tier_completion(
                &"ghost".to_string(),
                Tier::Tier1,
                completion,
                AnalysisArtifact::Tier1(crate::domain::Tier1Artifact {
                    authenticity_check: crate::domain::AuthenticityCheck {
                        title_matches_role: true,
                        is_authentic: true,
                    },
                    classification: crate::domain::Classification {
                        industry: "tech".to_string(),
                        sub_industry: None,
                        job_function: None,
                        seniority_level: None,
                    },
                    structured_data: crate::domain::StructuredData::default(),
                }),
            )
            .await;
        assert!(result.is_err());
    }
}
