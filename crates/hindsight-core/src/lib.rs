pub mod cluster;
pub mod event;
pub mod insight;
pub mod promotion;
pub mod reflection;
pub mod scoring;

pub use cluster::{extract_cluster_key, ClusterKey, CLUSTER_KEY_SEPARATOR};
pub use event::{InsightEvent, InsightEventKind, InsightEventSink};
pub use insight::{Insight, InsightStatus, Priority, PromotionReadiness};
pub use promotion::{
    can_promote, has_minimum_quality, PROMOTION_AUTHOR_THRESHOLD, PROMOTION_COOLDOWN_HOURS,
};
pub use reflection::{Reflection, Severity};
pub use scoring::{compute_score, max_severity, score_to_priority};
