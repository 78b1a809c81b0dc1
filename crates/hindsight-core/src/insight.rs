use crate::reflection::{Reflection, Severity};
use crate::scoring::{compute_score, max_severity, score_to_priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle states. `candidate -> promoted -> cooldown -> closed`, with a
/// reopen edge from `cooldown` back to `promoted`. `task_created` is set only
/// through the administrative status update by the external task bridge; the
/// sweeper never touches it. `closed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Candidate,
    Promoted,
    Cooldown,
    TaskCreated,
    Closed,
}

impl InsightStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightStatus::Candidate => "candidate",
            InsightStatus::Promoted => "promoted",
            InsightStatus::Cooldown => "cooldown",
            InsightStatus::TaskCreated => "task_created",
            InsightStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for InsightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "candidate" => Ok(InsightStatus::Candidate),
            "promoted" => Ok(InsightStatus::Promoted),
            "cooldown" => Ok(InsightStatus::Cooldown),
            "task_created" | "task-created" => Ok(InsightStatus::TaskCreated),
            "closed" => Ok(InsightStatus::Closed),
            other => Err(format!("unknown insight status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "P0" => Ok(Priority::P0),
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            "P3" => Ok(Priority::P3),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromotionReadiness {
    NotReady,
    Ready,
    Promoted,
    Override,
}

impl PromotionReadiness {
    pub fn as_str(self) -> &'static str {
        match self {
            PromotionReadiness::NotReady => "not_ready",
            PromotionReadiness::Ready => "ready",
            PromotionReadiness::Promoted => "promoted",
            PromotionReadiness::Override => "override",
        }
    }
}

impl fmt::Display for PromotionReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromotionReadiness {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "not_ready" | "not-ready" => Ok(PromotionReadiness::NotReady),
            "ready" => Ok(PromotionReadiness::Ready),
            "promoted" => Ok(PromotionReadiness::Promoted),
            "override" => Ok(PromotionReadiness::Override),
            other => Err(format!("unknown promotion readiness: {other}")),
        }
    }
}

/// A deduplicated aggregate of reflections sharing a failure signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub insight_id: String,
    pub cluster_key: String,
    pub workflow_stage: String,
    pub failure_family: String,
    pub impacted_unit: String,
    pub title: String,
    pub status: InsightStatus,
    /// Aggregate score, 0..=10, one-decimal precision.
    pub score: f64,
    pub priority: Priority,
    /// Member reflection ids, insertion order preserved, no duplicates.
    pub reflection_ids: Vec<String>,
    /// Always equals `authors.len()`.
    pub independent_count: usize,
    /// Union of member evidence, sorted and deduplicated.
    pub evidence_refs: Vec<String>,
    /// Distinct member authors, sorted.
    pub authors: Vec<String>,
    pub promotion_readiness: PromotionReadiness,
    pub recurring_candidate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_max: Option<Severity>,
    /// Set by the external task bridge, never by this engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Insight {
    /// Append a reflection id if it is not already linked.
    /// Returns false for an already-linked id (idempotent no-op).
    pub fn link_reflection(&mut self, reflection_id: &str) -> bool {
        if self.reflection_ids.iter().any(|id| id == reflection_id) {
            return false;
        }
        self.reflection_ids.push(reflection_id.to_string());
        true
    }

    /// Recompute every aggregate that is a pure function of the member set:
    /// authors, independent_count, evidence_refs, score, priority,
    /// severity_max. Status and cooldown fields are left alone.
    pub fn refresh_aggregates(&mut self, members: &[Reflection]) {
        let authors = members
            .iter()
            .map(|member| member.author.as_str())
            .collect::<BTreeSet<&str>>();
        self.authors = authors.into_iter().map(str::to_string).collect();
        self.independent_count = self.authors.len();

        let evidence = members
            .iter()
            .flat_map(|member| member.evidence.iter())
            .map(String::as_str)
            .collect::<BTreeSet<&str>>();
        self.evidence_refs = evidence.into_iter().map(str::to_string).collect();

        self.score = compute_score(members);
        self.priority = score_to_priority(self.score);
        self.severity_max = max_severity(members);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn reflection(id: &str, author: &str, evidence: &[&str]) -> Reflection {
        Reflection {
            reflection_id: id.to_string(),
            pain: "deploy failed silently".to_string(),
            impact: "release blocked for a day".to_string(),
            evidence: evidence.iter().map(|e| e.to_string()).collect(),
            went_well: None,
            suspected_why: None,
            proposed_fix: None,
            confidence: 5,
            role_type: "engineer".to_string(),
            severity: None,
            author: author.to_string(),
            tags: Vec::new(),
            team_id: None,
            created_at: ts(),
        }
    }

    fn blank_insight() -> Insight {
        Insight {
            insight_id: "ins-1".to_string(),
            cluster_key: "deploy::deployment::ci".to_string(),
            workflow_stage: "deploy".to_string(),
            failure_family: "deployment".to_string(),
            impacted_unit: "ci".to_string(),
            title: "deploy failed silently".to_string(),
            status: InsightStatus::Candidate,
            score: 0.0,
            priority: Priority::P3,
            reflection_ids: Vec::new(),
            independent_count: 0,
            evidence_refs: Vec::new(),
            authors: Vec::new(),
            promotion_readiness: PromotionReadiness::NotReady,
            recurring_candidate: false,
            cooldown_until: None,
            cooldown_reason: None,
            severity_max: None,
            task_id: None,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    #[test]
    fn link_reflection_rejects_duplicates_and_keeps_order() {
        let mut insight = blank_insight();
        assert!(insight.link_reflection("r-2"));
        assert!(insight.link_reflection("r-1"));
        assert!(!insight.link_reflection("r-2"));
        assert_eq!(insight.reflection_ids, vec!["r-2", "r-1"]);
    }

    #[test]
    fn refresh_aggregates_unions_authors_and_evidence() {
        let mut insight = blank_insight();
        let members = [
            reflection("r-1", "ana", &["a.log", "b.log"]),
            reflection("r-2", "ben", &["b.log"]),
            reflection("r-3", "ana", &[]),
        ];
        insight.refresh_aggregates(&members);
        assert_eq!(insight.authors, vec!["ana", "ben"]);
        assert_eq!(insight.independent_count, 2);
        assert_eq!(insight.evidence_refs, vec!["a.log", "b.log"]);
        assert_eq!(insight.severity_max, None);
        // 5 base + 1.0 volume boost for three members
        assert_eq!(insight.score, 6.0);
        assert_eq!(insight.priority, Priority::P1);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            InsightStatus::Candidate,
            InsightStatus::Promoted,
            InsightStatus::Cooldown,
            InsightStatus::TaskCreated,
            InsightStatus::Closed,
        ] {
            assert_eq!(
                status.as_str().parse::<InsightStatus>().expect("parse"),
                status
            );
        }
        assert_eq!(
            serde_json::to_string(&InsightStatus::TaskCreated).expect("serialize"),
            "\"task_created\""
        );
    }
}
