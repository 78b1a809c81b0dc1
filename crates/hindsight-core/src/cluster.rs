use crate::reflection::Reflection;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CLUSTER_KEY_SEPARATOR: &str = "::";

const STAGE_TAG_PREFIX: &str = "stage:";
const FAMILY_TAG_PREFIX: &str = "family:";
const UNIT_TAG_PREFIX: &str = "unit:";

const FALLBACK_STAGE: &str = "general";
const FALLBACK_FAMILY: &str = "uncategorized";
const FALLBACK_UNIT: &str = "general";

/// The `(workflow_stage, failure_family, impacted_unit)` triple identifying
/// which insight a reflection belongs to. Every field is a non-empty
/// lowercase token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub workflow_stage: String,
    pub failure_family: String,
    pub impacted_unit: String,
}

impl ClusterKey {
    /// Joined `stage::family::unit` form used as the storage key.
    pub fn joined(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.workflow_stage,
            self.failure_family,
            self.impacted_unit,
            sep = CLUSTER_KEY_SEPARATOR
        )
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Ordered keyword table for workflow_stage inference. First match wins;
/// the order is part of the contract.
fn stage_patterns() -> Vec<(Regex, &'static str)> {
    [
        (r"review", "review"),
        (r"deploy|release|rollout", "deploy"),
        (r"build|compil", "build"),
        (r"\btest|flaky|assertion", "test"),
        (r"design|mockup|wireframe", "design"),
        (r"implement|refactor|coding", "implement"),
        (r"triage|incident|on.?call", "triage"),
        (r"process|standup|meeting|handoff", "process"),
        (r"discover|explor|research|spike", "discovery"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("valid regex"), label))
    .collect()
}

/// Ordered keyword table for failure_family inference. First match wins.
fn family_patterns() -> Vec<(Regex, &'static str)> {
    [
        (r"data.?loss|lost (?:data|work)|corrupt", "data-loss"),
        (
            r"crash|panic|exception|stack trace|runtime error",
            "runtime-error",
        ),
        (r"slow|latency|performance|timed? ?out", "performance"),
        (r"access|permission|credential|forbidden|auth", "access"),
        (r"\bui\b|\bux\b|layout|render|styling", "ui"),
        (r"config|env var|environment variable|\.env\b", "config"),
        (r"deploy|release|rollback|pipeline", "deployment"),
        (r"\btest|coverage|flaky", "testing"),
        (
            r"couldn.?t find|hard to find|searching for|navigat",
            "code-discovery",
        ),
        (r"process|standup|approval|handoff", "process"),
        (r"pull.?request|\bpr\b|merge conflict|rebase", "pr-workflow"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("valid regex"), label))
    .collect()
}

/// Units a bare single-word tag may name directly.
const UNIT_TAGS: [&str; 10] = [
    "api", "frontend", "backend", "infra", "ci", "ux", "docs", "node", "cloud", "cli",
];

/// Derive the cluster key for a reflection. Pure and deterministic:
/// identical `(tags, pain, team_id)` always yields the identical key.
///
/// Per field, resolution order is explicit `stage:`/`family:`/`unit:` tag,
/// then keyword inference over pain + tags, then (for unit only) team_id,
/// then the literal fallback. No field is ever left empty.
pub fn extract_cluster_key(reflection: &Reflection) -> ClusterKey {
    let haystack = heuristic_haystack(reflection);

    let workflow_stage = tagged_value(&reflection.tags, STAGE_TAG_PREFIX)
        .or_else(|| first_match(&stage_patterns(), &haystack))
        .unwrap_or_else(|| FALLBACK_STAGE.to_string());

    let failure_family = tagged_value(&reflection.tags, FAMILY_TAG_PREFIX)
        .or_else(|| first_match(&family_patterns(), &haystack))
        .unwrap_or_else(|| FALLBACK_FAMILY.to_string());

    let impacted_unit = tagged_value(&reflection.tags, UNIT_TAG_PREFIX)
        .or_else(|| unit_from_tags(&reflection.tags))
        .or_else(|| normalized_token(reflection.team_id.as_deref().unwrap_or_default()))
        .unwrap_or_else(|| FALLBACK_UNIT.to_string());

    ClusterKey {
        workflow_stage,
        failure_family,
        impacted_unit,
    }
}

fn heuristic_haystack(reflection: &Reflection) -> String {
    let mut haystack = reflection.pain.to_lowercase();
    for tag in &reflection.tags {
        haystack.push(' ');
        haystack.push_str(&tag.to_lowercase());
    }
    haystack
}

fn tagged_value(tags: &[String], prefix: &str) -> Option<String> {
    tags.iter().find_map(|tag| {
        let lowered = tag.trim().to_lowercase();
        let value = lowered.strip_prefix(prefix)?;
        normalized_token(value)
    })
}

fn first_match(patterns: &[(Regex, &'static str)], haystack: &str) -> Option<String> {
    patterns
        .iter()
        .find(|(pattern, _)| pattern.is_match(haystack))
        .map(|(_, label)| label.to_string())
}

fn unit_from_tags(tags: &[String]) -> Option<String> {
    tags.iter().find_map(|tag| {
        let lowered = tag.trim().to_lowercase();
        UNIT_TAGS
            .iter()
            .find(|unit| **unit == lowered)
            .map(|unit| unit.to_string())
    })
}

fn normalized_token(value: &str) -> Option<String> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
