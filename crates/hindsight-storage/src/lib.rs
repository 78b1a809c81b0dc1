use chrono::{DateTime, SecondsFormat, Utc};
use hindsight_core::{Insight, InsightStatus, Priority, PromotionReadiness, Reflection, Severity};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const INSIGHT_SCHEMA_VERSION: i64 = 1;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;
const TOP_FAMILY_LIMIT: usize = 20;

const INSIGHT_COLUMNS: &str = "insight_id, cluster_key, workflow_stage, failure_family, \
     impacted_unit, title, status, score, priority, reflection_ids_json, independent_count, \
     evidence_refs_json, authors_json, promotion_readiness, recurring_candidate, \
     cooldown_until, cooldown_reason, severity_max, task_id, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("an open insight already exists for cluster key {cluster_key}")]
    OpenClusterConflict { cluster_key: String },
}

/// Filters for `list_insights`. Unset fields do not constrain the result.
#[derive(Debug, Default, Clone)]
pub struct InsightFilter {
    pub status: Option<InsightStatus>,
    pub priority: Option<Priority>,
    pub workflow_stage: Option<String>,
    pub failure_family: Option<String>,
    pub impacted_unit: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureFamilyCount {
    pub failure_family: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsightStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<String, i64>,
    pub top_failure_families: Vec<FailureFamilyCount>,
}

pub struct InsightStore {
    conn: Connection,
}

impl InsightStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > INSIGHT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: INSIGHT_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_insight_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Reflection store
    // ------------------------------------------------------------------

    /// Insert a reflection, ignoring an already-present id.
    /// Returns true when a row was written.
    pub fn insert_reflection(&self, reflection: &Reflection) -> Result<bool, StorageError> {
        let evidence_json = to_json(&reflection.evidence)?;
        let tags_json = to_json(&reflection.tags)?;

        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO reflections (
                reflection_id,
                pain,
                impact,
                evidence_json,
                went_well,
                suspected_why,
                proposed_fix,
                confidence,
                role_type,
                severity,
                author,
                tags_json,
                team_id,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ",
            params![
                reflection.reflection_id,
                reflection.pain,
                reflection.impact,
                evidence_json,
                reflection.went_well,
                reflection.suspected_why,
                reflection.proposed_fix,
                i64::from(reflection.confidence),
                reflection.role_type,
                reflection.severity.map(Severity::as_str),
                reflection.author,
                tags_json,
                reflection.team_id,
                format_ts(reflection.created_at),
            ],
        )?;

        Ok(changes > 0)
    }

    /// Load reflections by id, preserving the requested order.
    /// Ids with no stored row are silently skipped.
    pub fn reflections_by_ids(&self, ids: &[String]) -> Result<Vec<Reflection>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT reflection_id, pain, impact, evidence_json, went_well, suspected_why,
                   proposed_fix, confidence, role_type, severity, author, tags_json,
                   team_id, created_at
            FROM reflections
            WHERE reflection_id = ?1
            ",
        )?;

        let mut reflections = Vec::with_capacity(ids.len());
        for id in ids {
            let row = statement
                .query_row([id], reflection_from_row)
                .optional()?;
            if let Some(reflection) = row {
                reflections.push(reflection);
            }
        }
        Ok(reflections)
    }

    // ------------------------------------------------------------------
    // Insight store
    // ------------------------------------------------------------------

    /// Insert a fresh insight. A second open insight for the same cluster
    /// key trips the partial unique index and surfaces as
    /// `OpenClusterConflict` so the caller can retry as a merge.
    pub fn insert_insight(&self, insight: &Insight) -> Result<(), StorageError> {
        let result = self.conn.execute(
            &format!(
                "
                INSERT INTO insights ({INSIGHT_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                        ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
                "
            ),
            params![
                insight.insight_id,
                insight.cluster_key,
                insight.workflow_stage,
                insight.failure_family,
                insight.impacted_unit,
                insight.title,
                insight.status.as_str(),
                insight.score,
                insight.priority.as_str(),
                to_json(&insight.reflection_ids)?,
                insight.independent_count as i64,
                to_json(&insight.evidence_refs)?,
                to_json(&insight.authors)?,
                insight.promotion_readiness.as_str(),
                insight.recurring_candidate as i64,
                insight.cooldown_until.map(format_ts),
                insight.cooldown_reason,
                insight.severity_max.map(Severity::as_str),
                insight.task_id,
                format_ts(insight.created_at),
                format_ts(insight.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            // SQLite names the column, not the index, on a unique violation:
            // "UNIQUE constraint failed: insights.cluster_key"
            Err(rusqlite::Error::SqliteFailure(err, message))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && message
                        .as_deref()
                        .is_some_and(|text| text.contains("insights.cluster_key")) =>
            {
                Err(StorageError::OpenClusterConflict {
                    cluster_key: insight.cluster_key.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Rewrite every mutable column of an insight. Returns false for an
    /// unknown id.
    pub fn update_insight(&self, insight: &Insight) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE insights SET
                title = ?2,
                status = ?3,
                score = ?4,
                priority = ?5,
                reflection_ids_json = ?6,
                independent_count = ?7,
                evidence_refs_json = ?8,
                authors_json = ?9,
                promotion_readiness = ?10,
                recurring_candidate = ?11,
                cooldown_until = ?12,
                cooldown_reason = ?13,
                severity_max = ?14,
                task_id = ?15,
                updated_at = ?16
            WHERE insight_id = ?1
            ",
            params![
                insight.insight_id,
                insight.title,
                insight.status.as_str(),
                insight.score,
                insight.priority.as_str(),
                to_json(&insight.reflection_ids)?,
                insight.independent_count as i64,
                to_json(&insight.evidence_refs)?,
                to_json(&insight.authors)?,
                insight.promotion_readiness.as_str(),
                insight.recurring_candidate as i64,
                insight.cooldown_until.map(format_ts),
                insight.cooldown_reason,
                insight.severity_max.map(Severity::as_str),
                insight.task_id,
                format_ts(insight.updated_at),
            ],
        )?;

        Ok(changes > 0)
    }

    pub fn insight_by_id(&self, insight_id: &str) -> Result<Option<Insight>, StorageError> {
        let insight = self
            .conn
            .query_row(
                &format!("SELECT {INSIGHT_COLUMNS} FROM insights WHERE insight_id = ?1"),
                [insight_id],
                insight_from_row,
            )
            .optional()?;
        Ok(insight)
    }

    /// Most recent non-closed insight for a cluster key. The partial unique
    /// index guarantees at most one; the ordering is defensive.
    pub fn find_open_by_cluster(&self, cluster_key: &str) -> Result<Option<Insight>, StorageError> {
        let insight = self
            .conn
            .query_row(
                &format!(
                    "
                    SELECT {INSIGHT_COLUMNS}
                    FROM insights
                    WHERE cluster_key = ?1 AND status != 'closed'
                    ORDER BY created_at DESC
                    LIMIT 1
                    "
                ),
                [cluster_key],
                insight_from_row,
            )
            .optional()?;
        Ok(insight)
    }

    /// Mark a single insight closed. Closed rows are never written again.
    pub fn close_insight(
        &self,
        insight_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE insights SET status = 'closed', updated_at = ?2
            WHERE insight_id = ?1 AND status != 'closed'
            ",
            params![insight_id, format_ts(now)],
        )?;
        Ok(changes > 0)
    }

    // ------------------------------------------------------------------
    // Cooldown sweep
    // ------------------------------------------------------------------

    /// Flip every promoted insight whose cooldown window has elapsed into
    /// cooldown. Idempotent; returns the number of rows flipped.
    pub fn cool_expired_promoted(
        &self,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<usize, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE insights SET status = 'cooldown', cooldown_reason = ?1, updated_at = ?2
            WHERE status = 'promoted'
              AND cooldown_until IS NOT NULL
              AND cooldown_until <= ?2
            ",
            params![reason, format_ts(now)],
        )?;
        Ok(changes)
    }

    /// Close every cooldown insight untouched since the cutoff. The cutoff
    /// keys off `updated_at`, not the moment cooldown began.
    pub fn close_stale_cooldowns(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE insights SET status = 'closed', updated_at = ?2
            WHERE status = 'cooldown' AND updated_at < ?1
            ",
            params![format_ts(cutoff), format_ts(now)],
        )?;
        Ok(changes)
    }

    // ------------------------------------------------------------------
    // Query layer
    // ------------------------------------------------------------------

    pub fn list_insights(&self, filter: &InsightFilter) -> Result<Vec<Insight>, StorageError> {
        let mut conditions = Vec::new();
        let mut bound = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            bound.push(status.as_str().to_string());
        }
        if let Some(priority) = filter.priority {
            conditions.push("priority = ?");
            bound.push(priority.as_str().to_string());
        }
        if let Some(stage) = filter.workflow_stage.as_deref() {
            conditions.push("workflow_stage = ?");
            bound.push(stage.to_string());
        }
        if let Some(family) = filter.failure_family.as_deref() {
            conditions.push("failure_family = ?");
            bound.push(family.to_string());
        }
        if let Some(unit) = filter.impacted_unit.as_deref() {
            conditions.push("impacted_unit = ?");
            bound.push(unit.to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

        let mut statement = self.conn.prepare(&format!(
            "
            SELECT {INSIGHT_COLUMNS}
            FROM insights
            {where_clause}
            ORDER BY score DESC, created_at DESC
            LIMIT {limit} OFFSET {offset}
            ",
            offset = filter.offset,
        ))?;

        let rows = statement.query_map(rusqlite::params_from_iter(bound.iter()), insight_from_row)?;
        let mut insights = Vec::new();
        for row in rows {
            insights.push(row?);
        }
        Ok(insights)
    }

    pub fn insight_stats(&self) -> Result<InsightStats, StorageError> {
        let total = self
            .conn
            .query_row("SELECT COUNT(*) FROM insights", [], |row| row.get(0))?;

        let by_status = self.grouped_counts("status")?;
        let by_priority = self.grouped_counts("priority")?;

        let mut statement = self.conn.prepare(&format!(
            "
            SELECT failure_family, COUNT(*) AS n
            FROM insights
            GROUP BY failure_family
            ORDER BY n DESC, failure_family ASC
            LIMIT {TOP_FAMILY_LIMIT}
            "
        ))?;
        let rows = statement.query_map([], |row| {
            Ok(FailureFamilyCount {
                failure_family: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let mut top_failure_families = Vec::new();
        for row in rows {
            top_failure_families.push(row?);
        }

        Ok(InsightStats {
            total,
            by_status,
            by_priority,
            top_failure_families,
        })
    }

    fn grouped_counts(&self, column: &str) -> Result<BTreeMap<String, i64>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT {column}, COUNT(*) FROM insights GROUP BY {column}"
        ))?;
        let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (key, count): (String, i64) = row?;
            counts.insert(key, count);
        }
        Ok(counts)
    }

    #[cfg(test)]
    fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

/// Fixed-width RFC 3339 (millisecond precision, Z suffix) so lexicographic
/// TEXT comparisons in SQL are chronological.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn text_column_err(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_ts_column(index: usize, raw: String) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| text_column_err(index, err.to_string()))
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    index: usize,
    raw: String,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(&raw).map_err(|err| text_column_err(index, err.to_string()))
}

fn reflection_from_row(row: &rusqlite::Row<'_>) -> Result<Reflection, rusqlite::Error> {
    let severity = row
        .get::<_, Option<String>>(9)?
        .map(|raw| raw.parse::<Severity>().map_err(|err| text_column_err(9, err)))
        .transpose()?;

    Ok(Reflection {
        reflection_id: row.get(0)?,
        pain: row.get(1)?,
        impact: row.get(2)?,
        evidence: parse_json_column(3, row.get(3)?)?,
        went_well: row.get(4)?,
        suspected_why: row.get(5)?,
        proposed_fix: row.get(6)?,
        confidence: row.get::<_, i64>(7)? as u8,
        role_type: row.get(8)?,
        severity,
        author: row.get(10)?,
        tags: parse_json_column(11, row.get(11)?)?,
        team_id: row.get(12)?,
        created_at: parse_ts_column(13, row.get(13)?)?,
    })
}

fn insight_from_row(row: &rusqlite::Row<'_>) -> Result<Insight, rusqlite::Error> {
    let status = row
        .get::<_, String>(6)?
        .parse::<InsightStatus>()
        .map_err(|err| text_column_err(6, err))?;
    let priority = row
        .get::<_, String>(8)?
        .parse::<Priority>()
        .map_err(|err| text_column_err(8, err))?;
    let promotion_readiness = row
        .get::<_, String>(13)?
        .parse::<PromotionReadiness>()
        .map_err(|err| text_column_err(13, err))?;
    let cooldown_until = row
        .get::<_, Option<String>>(15)?
        .map(|raw| parse_ts_column(15, raw))
        .transpose()?;
    let severity_max = row
        .get::<_, Option<String>>(17)?
        .map(|raw| raw.parse::<Severity>().map_err(|err| text_column_err(17, err)))
        .transpose()?;

    Ok(Insight {
        insight_id: row.get(0)?,
        cluster_key: row.get(1)?,
        workflow_stage: row.get(2)?,
        failure_family: row.get(3)?,
        impacted_unit: row.get(4)?,
        title: row.get(5)?,
        status,
        score: row.get(7)?,
        priority,
        reflection_ids: parse_json_column(9, row.get(9)?)?,
        independent_count: row.get::<_, i64>(10)? as usize,
        evidence_refs: parse_json_column(11, row.get(11)?)?,
        authors: parse_json_column(12, row.get(12)?)?,
        promotion_readiness,
        recurring_candidate: row.get::<_, i64>(14)? != 0,
        cooldown_until,
        cooldown_reason: row.get(16)?,
        severity_max,
        task_id: row.get(18)?,
        created_at: parse_ts_column(19, row.get(19)?)?,
        updated_at: parse_ts_column(20, row.get(20)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::NamedTempFile;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn sample_reflection(id: &str, author: &str) -> Reflection {
        Reflection {
            reflection_id: id.to_string(),
            pain: "deploy pipeline stalled on approval".to_string(),
            impact: "release slipped a day".to_string(),
            evidence: vec!["ci-run-812.log".to_string()],
            went_well: Some("rollback worked".to_string()),
            suspected_why: Some("stale approval cache".to_string()),
            proposed_fix: None,
            confidence: 6,
            role_type: "engineer".to_string(),
            severity: Some(Severity::High),
            author: author.to_string(),
            tags: vec!["ci".to_string()],
            team_id: Some("platform".to_string()),
            created_at: ts(),
        }
    }

    fn sample_insight(id: &str, cluster_key: &str, status: InsightStatus) -> Insight {
        Insight {
            insight_id: id.to_string(),
            cluster_key: cluster_key.to_string(),
            workflow_stage: "deploy".to_string(),
            failure_family: "deployment".to_string(),
            impacted_unit: "ci".to_string(),
            title: "deploy pipeline stalled on approval".to_string(),
            status,
            score: 6.5,
            priority: Priority::P1,
            reflection_ids: vec!["r-1".to_string()],
            independent_count: 1,
            evidence_refs: vec!["ci-run-812.log".to_string()],
            authors: vec!["ana".to_string()],
            promotion_readiness: PromotionReadiness::NotReady,
            recurring_candidate: false,
            cooldown_until: None,
            cooldown_reason: None,
            severity_max: Some(Severity::High),
            task_id: None,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    #[test]
    fn migration_creates_schema() {
        let store = InsightStore::open_in_memory().expect("open db");
        assert!(store.table_exists("reflections").expect("table check"));
        assert!(store.table_exists("insights").expect("table check"));
        assert_eq!(
            store.schema_version().expect("schema version"),
            INSIGHT_SCHEMA_VERSION
        );
    }

    #[test]
    fn reflection_roundtrip_is_idempotent_by_id() {
        let file = NamedTempFile::new().expect("temp db");
        let store = InsightStore::open(file.path()).expect("open db");
        let reflection = sample_reflection("r-1", "ana");

        assert!(store.insert_reflection(&reflection).expect("insert"));
        assert!(!store.insert_reflection(&reflection).expect("second insert"));

        let loaded = store
            .reflections_by_ids(&["r-1".to_string(), "missing".to_string()])
            .expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], reflection);
    }

    #[test]
    fn insight_roundtrip_preserves_every_column() {
        let store = InsightStore::open_in_memory().expect("open db");
        let mut insight = sample_insight("ins-1", "deploy::deployment::ci", InsightStatus::Promoted);
        insight.cooldown_until = Some(ts() + Duration::hours(24));
        insight.cooldown_reason = Some("auto-promoted".to_string());
        insight.recurring_candidate = true;
        insight.task_id = Some("task-44".to_string());

        store.insert_insight(&insight).expect("insert");
        let loaded = store
            .insight_by_id("ins-1")
            .expect("query")
            .expect("present");
        assert_eq!(loaded, insight);
    }

    #[test]
    fn second_open_insight_for_same_cluster_conflicts() {
        let store = InsightStore::open_in_memory().expect("open db");
        store
            .insert_insight(&sample_insight(
                "ins-1",
                "deploy::deployment::ci",
                InsightStatus::Candidate,
            ))
            .expect("first insert");

        let err = store
            .insert_insight(&sample_insight(
                "ins-2",
                "deploy::deployment::ci",
                InsightStatus::Candidate,
            ))
            .expect_err("second open insert must conflict");
        assert!(matches!(
            err,
            StorageError::OpenClusterConflict { ref cluster_key }
                if cluster_key == "deploy::deployment::ci"
        ));
    }

    #[test]
    fn closing_frees_the_cluster_key_for_a_new_insight() {
        let store = InsightStore::open_in_memory().expect("open db");
        store
            .insert_insight(&sample_insight(
                "ins-1",
                "deploy::deployment::ci",
                InsightStatus::Cooldown,
            ))
            .expect("first insert");

        assert!(store.close_insight("ins-1", ts()).expect("close"));
        assert!(!store.close_insight("ins-1", ts()).expect("second close"));

        store
            .insert_insight(&sample_insight(
                "ins-2",
                "deploy::deployment::ci",
                InsightStatus::Candidate,
            ))
            .expect("insert after close");

        let open = store
            .find_open_by_cluster("deploy::deployment::ci")
            .expect("query")
            .expect("open insight");
        assert_eq!(open.insight_id, "ins-2");
    }

    #[test]
    fn task_created_still_blocks_the_cluster_key() {
        let store = InsightStore::open_in_memory().expect("open db");
        store
            .insert_insight(&sample_insight(
                "ins-1",
                "deploy::deployment::ci",
                InsightStatus::TaskCreated,
            ))
            .expect("insert");

        let err = store
            .insert_insight(&sample_insight(
                "ins-2",
                "deploy::deployment::ci",
                InsightStatus::Candidate,
            ))
            .expect_err("task_created rows are still open");
        assert!(matches!(err, StorageError::OpenClusterConflict { .. }));
    }

    #[test]
    fn list_insights_filters_and_sorts_by_score_then_recency() {
        let store = InsightStore::open_in_memory().expect("open db");
        let mut low = sample_insight("ins-low", "a::testing::ci", InsightStatus::Candidate);
        low.score = 3.0;
        low.priority = Priority::P2;
        let mut high = sample_insight("ins-high", "b::testing::api", InsightStatus::Promoted);
        high.score = 8.0;
        high.priority = Priority::P0;
        high.failure_family = "testing".to_string();
        low.failure_family = "testing".to_string();
        store.insert_insight(&low).expect("insert low");
        store.insert_insight(&high).expect("insert high");

        let all = store
            .list_insights(&InsightFilter::default())
            .expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].insight_id, "ins-high");

        let promoted_only = store
            .list_insights(&InsightFilter {
                status: Some(InsightStatus::Promoted),
                ..Default::default()
            })
            .expect("filtered list");
        assert_eq!(promoted_only.len(), 1);
        assert_eq!(promoted_only[0].insight_id, "ins-high");

        let clamped = store
            .list_insights(&InsightFilter {
                limit: Some(10_000),
                ..Default::default()
            })
            .expect("clamped list");
        assert_eq!(clamped.len(), 2);
    }

    #[test]
    fn stats_count_by_status_priority_and_family() {
        let store = InsightStore::open_in_memory().expect("open db");
        let mut a = sample_insight("ins-1", "a::testing::ci", InsightStatus::Candidate);
        a.failure_family = "testing".to_string();
        let mut b = sample_insight("ins-2", "b::config::api", InsightStatus::Promoted);
        b.failure_family = "config".to_string();
        let mut c = sample_insight("ins-3", "c::testing::api", InsightStatus::Promoted);
        c.failure_family = "testing".to_string();
        for insight in [&a, &b, &c] {
            store.insert_insight(insight).expect("insert");
        }

        let stats = store.insight_stats().expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.get("candidate"), Some(&1));
        assert_eq!(stats.by_status.get("promoted"), Some(&2));
        assert_eq!(stats.by_priority.get("P1"), Some(&3));
        assert_eq!(
            stats.top_failure_families.first(),
            Some(&FailureFamilyCount {
                failure_family: "testing".to_string(),
                count: 2,
            })
        );
    }

    #[test]
    fn cool_expired_promoted_only_touches_elapsed_windows() {
        let store = InsightStore::open_in_memory().expect("open db");
        let now = ts();

        let mut due = sample_insight("ins-due", "a::testing::ci", InsightStatus::Promoted);
        due.cooldown_until = Some(now - Duration::hours(1));
        let mut pending = sample_insight("ins-pending", "b::testing::ci", InsightStatus::Promoted);
        pending.cooldown_until = Some(now + Duration::hours(1));
        let candidate = sample_insight("ins-cand", "c::testing::ci", InsightStatus::Candidate);
        for insight in [&due, &pending, &candidate] {
            store.insert_insight(insight).expect("insert");
        }

        let cooled = store
            .cool_expired_promoted(now, "auto-cooldown")
            .expect("sweep");
        assert_eq!(cooled, 1);
        // already-transitioned rows are left alone on the next pass
        assert_eq!(
            store
                .cool_expired_promoted(now, "auto-cooldown")
                .expect("second sweep"),
            0
        );

        let loaded = store
            .insight_by_id("ins-due")
            .expect("query")
            .expect("present");
        assert_eq!(loaded.status, InsightStatus::Cooldown);
        assert_eq!(loaded.cooldown_reason.as_deref(), Some("auto-cooldown"));
        assert_eq!(
            store
                .insight_by_id("ins-cand")
                .expect("query")
                .expect("present")
                .status,
            InsightStatus::Candidate
        );
    }

    #[test]
    fn close_stale_cooldowns_keys_off_updated_at() {
        let store = InsightStore::open_in_memory().expect("open db");
        let now = ts();

        let mut stale = sample_insight("ins-stale", "a::testing::ci", InsightStatus::Cooldown);
        stale.updated_at = now - Duration::hours(30);
        let mut fresh = sample_insight("ins-fresh", "b::testing::ci", InsightStatus::Cooldown);
        fresh.updated_at = now - Duration::hours(2);
        store.insert_insight(&stale).expect("insert stale");
        store.insert_insight(&fresh).expect("insert fresh");

        let closed = store
            .close_stale_cooldowns(now - Duration::hours(24), now)
            .expect("sweep");
        assert_eq!(closed, 1);
        assert_eq!(
            store
                .insight_by_id("ins-stale")
                .expect("query")
                .expect("present")
                .status,
            InsightStatus::Closed
        );
        assert_eq!(
            store
                .insight_by_id("ins-fresh")
                .expect("query")
                .expect("present")
                .status,
            InsightStatus::Cooldown
        );
    }
}
