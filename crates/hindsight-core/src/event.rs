use crate::insight::{Insight, Priority};
use serde::{Deserialize, Serialize};

/// Domain events the engine publishes for the external task bridge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InsightEventKind {
    #[serde(rename = "insight:created")]
    Created,
    #[serde(rename = "insight:promoted")]
    Promoted,
    #[serde(rename = "insight:reopened")]
    Reopened,
}

impl InsightEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightEventKind::Created => "insight:created",
            InsightEventKind::Promoted => "insight:promoted",
            InsightEventKind::Reopened => "insight:reopened",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightEvent {
    pub kind: InsightEventKind,
    pub insight_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl InsightEvent {
    pub fn created(insight: &Insight) -> Self {
        Self::for_kind(InsightEventKind::Created, insight)
    }

    pub fn promoted(insight: &Insight) -> Self {
        Self::for_kind(InsightEventKind::Promoted, insight)
    }

    pub fn reopened(insight: &Insight) -> Self {
        Self::for_kind(InsightEventKind::Reopened, insight)
    }

    fn for_kind(kind: InsightEventKind, insight: &Insight) -> Self {
        Self {
            kind,
            insight_id: insight.insight_id.clone(),
            priority: Some(insight.priority),
            score: Some(insight.score),
        }
    }
}

/// Port the engine emits through; the embedding application bridges this to
/// its event bus. A plain `Vec<InsightEvent>` collects events in tests.
pub trait InsightEventSink {
    fn emit(&mut self, event: InsightEvent);
}

impl InsightEventSink for Vec<InsightEvent> {
    fn emit(&mut self, event: InsightEvent) {
        self.push(event);
    }
}
