use crate::insight::Priority;
use crate::reflection::{Reflection, Severity};

/// Aggregate score over the current member set, 0..=10 with one-decimal
/// precision. Empty sets score 0.
///
/// `base` is the highest member confidence; critical severity adds 2,
/// high adds 1; each member past the first adds 0.5 up to a cap of 2.
pub fn compute_score(reflections: &[Reflection]) -> f64 {
    if reflections.is_empty() {
        return 0.0;
    }

    let base = reflections
        .iter()
        .map(|reflection| reflection.confidence)
        .max()
        .unwrap_or(0) as f64;

    let severity_boost = reflections
        .iter()
        .map(|reflection| match reflection.severity {
            Some(Severity::Critical) => 2.0,
            Some(Severity::High) => 1.0,
            _ => 0.0,
        })
        .fold(0.0, f64::max);

    let volume_boost = (((reflections.len() - 1) as f64) * 0.5).min(2.0);

    let score = base + severity_boost + volume_boost;
    (score.min(10.0) * 10.0).round() / 10.0
}

/// Priority band for a score; boundaries are inclusive at the lower edge.
pub fn score_to_priority(score: f64) -> Priority {
    if score >= 8.0 {
        Priority::P0
    } else if score >= 5.0 {
        Priority::P1
    } else if score >= 3.0 {
        Priority::P2
    } else {
        Priority::P3
    }
}

/// Worst severity present in the set, None when no member carries one.
pub fn max_severity(reflections: &[Reflection]) -> Option<Severity> {
    reflections
        .iter()
        .filter_map(|reflection| reflection.severity)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reflection(confidence: u8, severity: Option<Severity>) -> Reflection {
        Reflection {
            reflection_id: format!("r-{confidence}"),
            pain: "something broke".to_string(),
            impact: "lost time".to_string(),
            evidence: Vec::new(),
            went_well: None,
            suspected_why: None,
            proposed_fix: None,
            confidence,
            role_type: "engineer".to_string(),
            severity,
            author: "ana".to_string(),
            tags: Vec::new(),
            team_id: None,
            created_at: Utc
                .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn empty_set_scores_zero() {
        assert_eq!(compute_score(&[]), 0.0);
    }

    #[test]
    fn base_is_max_confidence_with_severity_boost() {
        let members = [
            reflection(3, None),
            reflection(5, Some(Severity::Critical)),
        ];
        // base 5, critical +2, volume +0.5
        assert_eq!(compute_score(&members), 7.5);
    }

    #[test]
    fn high_severity_adds_one() {
        let members = [reflection(5, Some(Severity::High))];
        assert_eq!(compute_score(&members), 6.0);
    }

    #[test]
    fn medium_and_low_add_nothing() {
        assert_eq!(compute_score(&[reflection(5, Some(Severity::Medium))]), 5.0);
        assert_eq!(compute_score(&[reflection(5, Some(Severity::Low))]), 5.0);
    }

    #[test]
    fn volume_boost_caps_at_two() {
        let members = (0..8).map(|_| reflection(5, None)).collect::<Vec<_>>();
        // 7 extra members would be 3.5 uncapped
        assert_eq!(compute_score(&members), 7.0);
    }

    #[test]
    fn score_never_exceeds_ten() {
        let members = (0..6)
            .map(|_| reflection(10, Some(Severity::Critical)))
            .collect::<Vec<_>>();
        assert_eq!(compute_score(&members), 10.0);
    }

    #[test]
    fn priority_band_boundaries_are_inclusive_at_the_lower_edge() {
        let table = [
            (0.0, Priority::P3),
            (2.9, Priority::P3),
            (3.0, Priority::P2),
            (4.9, Priority::P2),
            (5.0, Priority::P1),
            (7.9, Priority::P1),
            (8.0, Priority::P0),
            (10.0, Priority::P0),
        ];
        for (score, expected) in table {
            assert_eq!(score_to_priority(score), expected, "score {score}");
        }
    }

    #[test]
    fn max_severity_ignores_unset_members() {
        assert_eq!(max_severity(&[reflection(5, None)]), None);
        let members = [
            reflection(5, None),
            reflection(4, Some(Severity::Medium)),
            reflection(3, Some(Severity::High)),
        ];
        assert_eq!(max_severity(&members), Some(Severity::High));
    }
}
