//! Lifecycle controller and cooldown sweeper over the insight store.
//!
//! Reflections are persisted by the caller first; `ingest_reflection` derives
//! the cluster key and creates, merges into, or reopens the open insight for
//! that key. `tick_cooldowns` is driven by an external scheduler.

use chrono::{DateTime, Duration, Utc};
use hindsight_core::{
    can_promote, extract_cluster_key, ClusterKey, Insight, InsightEvent, InsightEventSink,
    InsightStatus, Priority, PromotionReadiness, Reflection, PROMOTION_AUTHOR_THRESHOLD,
    PROMOTION_COOLDOWN_HOURS,
};
use hindsight_storage::{InsightStore, StorageError};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const REASON_AUTO_PROMOTED: &str = "auto-promoted";
pub const REASON_REOPENED: &str = "reopened";
pub const REASON_AUTO_COOLDOWN: &str = "auto-cooldown";

const RECURRING_THRESHOLD: usize = 4;
const TITLE_MAX_CHARS: usize = 80;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Suppression window applied on every promotion and reopen.
    pub cooldown: Duration,
    /// How long a cooldown insight may sit untouched before the sweeper
    /// closes it.
    pub stale_close_after: Duration,
    /// Linked-reflection count at which an insight is flagged recurring.
    pub recurring_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::hours(PROMOTION_COOLDOWN_HOURS),
            stale_close_after: Duration::hours(PROMOTION_COOLDOWN_HOURS),
            recurring_threshold: RECURRING_THRESHOLD,
        }
    }
}

/// Counts returned by a single `tick_cooldowns` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub cooled: usize,
    pub closed: usize,
}

pub struct InsightEngine {
    config: EngineConfig,
}

impl InsightEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Route an already-persisted reflection into the insight for its
    /// cluster key, creating / merging / reopening as the key's current
    /// state dictates. Returns the insight as stored after the call.
    pub fn ingest_reflection(
        &self,
        store: &InsightStore,
        reflection: &Reflection,
        now: DateTime<Utc>,
        sink: &mut dyn InsightEventSink,
    ) -> Result<Insight, EngineError> {
        let key = extract_cluster_key(reflection);
        match store.find_open_by_cluster(&key.joined())? {
            Some(open) => self.apply_to_open(store, open, reflection, &key, now, sink),
            None => self.create_with_retry(store, reflection, &key, now, sink),
        }
    }

    /// Administrative status mutation, used by the external task bridge to
    /// mark `task_created`. Returns false for an unknown or closed id.
    pub fn update_insight_status(
        &self,
        store: &InsightStore,
        insight_id: &str,
        status: InsightStatus,
        task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let Some(mut insight) = store.insight_by_id(insight_id)? else {
            return Ok(false);
        };
        if insight.status == InsightStatus::Closed {
            return Ok(false);
        }

        insight.status = status;
        if let Some(task_id) = task_id {
            insight.task_id = Some(task_id.to_string());
        }
        // the cooldown clock only runs in promoted/cooldown; closed rows
        // keep whatever they had at closure
        if !matches!(
            insight.status,
            InsightStatus::Promoted | InsightStatus::Cooldown | InsightStatus::Closed
        ) {
            insight.cooldown_until = None;
        }
        insight.updated_at = now;

        let updated = store.update_insight(&insight)?;
        if updated {
            info!(
                insight_id = %insight.insight_id,
                status = %insight.status,
                "administrative status update"
            );
        }
        Ok(updated)
    }

    /// Bulk sweep, safe to call repeatedly: expired promotions drop into
    /// cooldown, and cooldown rows untouched for the stale window close.
    /// The close cutoff keys off `updated_at`, so any mutation to an
    /// insight restarts its stale clock.
    pub fn tick_cooldowns(
        &self,
        store: &InsightStore,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, EngineError> {
        let cooled = store.cool_expired_promoted(now, REASON_AUTO_COOLDOWN)?;
        let closed = store.close_stale_cooldowns(now - self.config.stale_close_after, now)?;
        if cooled > 0 || closed > 0 {
            info!(cooled, closed, "cooldown sweep applied transitions");
        }
        Ok(SweepReport { cooled, closed })
    }

    fn apply_to_open(
        &self,
        store: &InsightStore,
        open: Insight,
        reflection: &Reflection,
        key: &ClusterKey,
        now: DateTime<Utc>,
        sink: &mut dyn InsightEventSink,
    ) -> Result<Insight, EngineError> {
        match open.status {
            InsightStatus::Cooldown => {
                let window_live = open.cooldown_until.is_some_and(|until| now < until);
                if window_live {
                    self.reopen(store, open, reflection, now, sink)
                } else {
                    // stale cooldown: close it and start the key over; the
                    // old reflection history is not carried forward
                    store.close_insight(&open.insight_id, now)?;
                    info!(
                        insight_id = %open.insight_id,
                        cluster_key = %open.cluster_key,
                        "closed stale cooldown insight on new reflection"
                    );
                    self.create_with_retry(store, reflection, key, now, sink)
                }
            }
            InsightStatus::Closed => self.create_with_retry(store, reflection, key, now, sink),
            _ => self.merge(store, open, reflection, now, sink),
        }
    }

    /// Create path with the uniqueness-conflict retry: when a concurrent
    /// writer claims the key between lookup and insert, adopt their insight
    /// and merge instead of failing the caller.
    fn create_with_retry(
        &self,
        store: &InsightStore,
        reflection: &Reflection,
        key: &ClusterKey,
        now: DateTime<Utc>,
        sink: &mut dyn InsightEventSink,
    ) -> Result<Insight, EngineError> {
        loop {
            match self.create(store, reflection, key, now, sink) {
                Ok(insight) => return Ok(insight),
                Err(EngineError::Storage(StorageError::OpenClusterConflict { .. })) => {
                    // another writer claimed the key between our lookup and
                    // insert; adopt their insight. If it already closed
                    // again, the key is free and the insert is retried.
                    if let Some(open) = store.find_open_by_cluster(&key.joined())? {
                        return self.apply_to_open(store, open, reflection, key, now, sink);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn create(
        &self,
        store: &InsightStore,
        reflection: &Reflection,
        key: &ClusterKey,
        now: DateTime<Utc>,
        sink: &mut dyn InsightEventSink,
    ) -> Result<Insight, EngineError> {
        let cluster_key = key.joined();
        let members = std::slice::from_ref(reflection);

        let mut insight = Insight {
            insight_id: Uuid::new_v4().to_string(),
            cluster_key: cluster_key.clone(),
            workflow_stage: key.workflow_stage.clone(),
            failure_family: key.failure_family.clone(),
            impacted_unit: key.impacted_unit.clone(),
            title: derive_title(reflection, &cluster_key),
            status: InsightStatus::Candidate,
            score: 0.0,
            priority: Priority::P3,
            reflection_ids: vec![reflection.reflection_id.clone()],
            independent_count: 0,
            evidence_refs: Vec::new(),
            authors: Vec::new(),
            promotion_readiness: PromotionReadiness::NotReady,
            recurring_candidate: false,
            cooldown_until: None,
            cooldown_reason: None,
            severity_max: None,
            task_id: None,
            created_at: now,
            updated_at: now,
        };
        insight.refresh_aggregates(members);

        // a singleton set can only clear the gate via the severity override
        let promoted = can_promote(members);
        if promoted {
            insight.status = InsightStatus::Promoted;
            insight.promotion_readiness = PromotionReadiness::Override;
            insight.cooldown_until = Some(now + self.config.cooldown);
            insight.cooldown_reason = Some(REASON_AUTO_PROMOTED.to_string());
        }

        store.insert_insight(&insight)?;

        if promoted {
            info!(
                insight_id = %insight.insight_id,
                cluster_key = %insight.cluster_key,
                score = insight.score,
                "created insight promoted via severity override"
            );
            sink.emit(InsightEvent::promoted(&insight));
        } else {
            debug!(
                insight_id = %insight.insight_id,
                cluster_key = %insight.cluster_key,
                "created candidate insight"
            );
            sink.emit(InsightEvent::created(&insight));
        }
        Ok(insight)
    }

    fn merge(
        &self,
        store: &InsightStore,
        mut open: Insight,
        reflection: &Reflection,
        now: DateTime<Utc>,
        sink: &mut dyn InsightEventSink,
    ) -> Result<Insight, EngineError> {
        if !open.link_reflection(&reflection.reflection_id) {
            debug!(
                insight_id = %open.insight_id,
                reflection_id = %reflection.reflection_id,
                "reflection already linked, no-op"
            );
            return Ok(open);
        }

        let members = self.members_with(store, &open, reflection)?;
        open.refresh_aggregates(&members);
        if open.reflection_ids.len() >= self.config.recurring_threshold {
            open.recurring_candidate = true;
        }

        let newly_promoted = open.status == InsightStatus::Candidate && can_promote(&members);
        if newly_promoted {
            open.status = InsightStatus::Promoted;
            open.promotion_readiness = if open.independent_count >= PROMOTION_AUTHOR_THRESHOLD {
                PromotionReadiness::Promoted
            } else {
                PromotionReadiness::Override
            };
            open.cooldown_until = Some(now + self.config.cooldown);
            open.cooldown_reason = Some(REASON_AUTO_PROMOTED.to_string());
        }
        open.updated_at = now;

        store.update_insight(&open)?;
        if newly_promoted {
            info!(
                insight_id = %open.insight_id,
                cluster_key = %open.cluster_key,
                score = open.score,
                independent_count = open.independent_count,
                "insight promoted"
            );
            sink.emit(InsightEvent::promoted(&open));
        }
        Ok(open)
    }

    fn reopen(
        &self,
        store: &InsightStore,
        mut open: Insight,
        reflection: &Reflection,
        now: DateTime<Utc>,
        sink: &mut dyn InsightEventSink,
    ) -> Result<Insight, EngineError> {
        open.link_reflection(&reflection.reflection_id);
        let members = self.members_with(store, &open, reflection)?;
        open.refresh_aggregates(&members);

        open.status = InsightStatus::Promoted;
        open.promotion_readiness = PromotionReadiness::Promoted;
        open.recurring_candidate = true;
        open.cooldown_until = Some(now + self.config.cooldown);
        open.cooldown_reason = Some(REASON_REOPENED.to_string());
        open.updated_at = now;

        store.update_insight(&open)?;
        info!(
            insight_id = %open.insight_id,
            cluster_key = %open.cluster_key,
            score = open.score,
            "insight reopened during cooldown"
        );
        sink.emit(InsightEvent::reopened(&open));
        Ok(open)
    }

    /// Current member set for aggregate recomputation. The incoming
    /// reflection is appended when the store has not persisted it yet.
    fn members_with(
        &self,
        store: &InsightStore,
        insight: &Insight,
        reflection: &Reflection,
    ) -> Result<Vec<Reflection>, EngineError> {
        let mut members = store.reflections_by_ids(&insight.reflection_ids)?;
        if !members
            .iter()
            .any(|member| member.reflection_id == reflection.reflection_id)
        {
            members.push(reflection.clone());
        }
        Ok(members)
    }
}

/// Insight title: the trimmed first-reflection pain, cut to 80 characters on
/// a char boundary, falling back to the cluster key when blank.
fn derive_title(reflection: &Reflection, cluster_key: &str) -> String {
    let pain = reflection.pain.trim();
    if pain.is_empty() {
        return cluster_key.to_string();
    }
    pain.chars().take(TITLE_MAX_CHARS).collect()
}
