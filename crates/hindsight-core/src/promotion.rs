use crate::reflection::{Reflection, Severity};
use std::collections::BTreeSet;

/// Independent-author corroboration threshold for promotion.
pub const PROMOTION_AUTHOR_THRESHOLD: usize = 2;
/// Suppression window after a promotion, in hours.
pub const PROMOTION_COOLDOWN_HOURS: i64 = 24;

const MIN_QUALITY_FIELDS: usize = 3;
const MIN_QUALITY_FIELD_LEN: usize = 10;

/// A reflection passes the quality bar when at least 3 of
/// pain / impact / suspected_why / proposed_fix carry 10+ characters
/// of trimmed content.
pub fn has_minimum_quality(reflection: &Reflection) -> bool {
    let fields = [
        Some(reflection.pain.as_str()),
        Some(reflection.impact.as_str()),
        reflection.suspected_why.as_deref(),
        reflection.proposed_fix.as_deref(),
    ];
    fields
        .iter()
        .filter(|field| field.is_some_and(|value| value.trim().len() >= MIN_QUALITY_FIELD_LEN))
        .count()
        >= MIN_QUALITY_FIELDS
}

/// Whether a member set justifies promoting its insight.
///
/// Rejected outright when nothing in the set passes the quality bar.
/// A single high/critical reflection that carries evidence and passes the
/// bar is enough on its own (the override path). Otherwise two distinct
/// authors are required.
pub fn can_promote(reflections: &[Reflection]) -> bool {
    if !reflections.iter().any(has_minimum_quality) {
        return false;
    }

    let severity_override = reflections.iter().any(|reflection| {
        matches!(
            reflection.severity,
            Some(Severity::High) | Some(Severity::Critical)
        ) && !reflection.evidence.is_empty()
            && has_minimum_quality(reflection)
    });
    if severity_override {
        return true;
    }

    let authors = reflections
        .iter()
        .map(|reflection| reflection.author.as_str())
        .collect::<BTreeSet<&str>>();
    authors.len() >= PROMOTION_AUTHOR_THRESHOLD
}
