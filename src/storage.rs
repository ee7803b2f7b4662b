//! SQLite storage layer for HealthQuest.
//!
//! The metric log is append-only: samples are inserted and read, never updated. Everything that
//! mutates shared state (progress rows, point balances, reward claims) has a connection-level
//! variant in this module so callers can compose it inside one transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::warn;

use crate::error::{Result, TrackerError};
use crate::model::{
    Challenge, ChallengeProgress, Goal, MetricKey, MetricSample, Owner, PeriodKind, RewardClaim,
};
use crate::period::Window;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

/// A challenge definition before it has been given an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChallenge {
    pub name: String,
    pub description: String,
    pub challenge_type: PeriodKind,
    pub goal_value: f64,
    pub reward_points: i64,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:healthquest.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS owners (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
                show_on_leaderboard INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metric_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES owners(id),
                metric_key TEXT NOT NULL,
                value REAL NOT NULL,
                ts INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for efficient time-range queries per owner and metric
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_metric_samples_owner_metric_ts
            ON metric_samples(owner_id, metric_key, ts)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS goals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES owners(id),
                metric_key TEXT NOT NULL,
                target_value REAL NOT NULL,
                period_kind TEXT NOT NULL,
                UNIQUE (owner_id, metric_key, period_kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS challenges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                challenge_type TEXT NOT NULL,
                goal_value REAL NOT NULL,
                reward_points INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS challenge_progress (
                owner_id INTEGER NOT NULL REFERENCES owners(id),
                challenge_id INTEGER NOT NULL REFERENCES challenges(id),
                progress REAL NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (owner_id, challenge_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reward_claims (
                owner_id INTEGER NOT NULL REFERENCES owners(id),
                reward_id TEXT NOT NULL,
                reward_name TEXT NOT NULL,
                claimed_at INTEGER NOT NULL,
                PRIMARY KEY (owner_id, reward_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Start a transaction. Dropping it without commit rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ------------------------------------------------------------------------
    // Owners
    // ------------------------------------------------------------------------

    /// Provision an owner. Account management lives outside this crate; this is its hook.
    pub async fn create_owner(&self, display_name: &str, show_on_leaderboard: bool) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO owners (display_name, show_on_leaderboard)
            VALUES (?, ?)
            "#,
        )
        .bind(display_name)
        .bind(show_on_leaderboard)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_owner(&self, owner_id: i64) -> Result<Option<Owner>> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, points, show_on_leaderboard
            FROM owners
            WHERE id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Owner {
            id: r.get("id"),
            display_name: r.get("display_name"),
            points: r.get("points"),
            show_on_leaderboard: r.get("show_on_leaderboard"),
        }))
    }

    pub async fn owner_exists(&self, owner_id: i64) -> Result<bool> {
        Ok(self.get_owner(owner_id).await?.is_some())
    }

    // ------------------------------------------------------------------------
    // Metric samples
    // ------------------------------------------------------------------------

    /// Append a sample to the metric log.
    pub async fn insert_sample(&self, sample: &MetricSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metric_samples (owner_id, metric_key, value, ts)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(sample.owner_id)
        .bind(sample.metric.as_str())
        .bind(sample.value)
        .bind(sample.recorded_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Full history of one metric for an owner, oldest first.
    pub async fn history(&self, owner_id: i64, metric: MetricKey) -> Result<Vec<MetricSample>> {
        let rows = sqlx::query(
            r#"
            SELECT value, ts
            FROM metric_samples
            WHERE owner_id = ? AND metric_key = ?
            ORDER BY ts ASC, id ASC
            "#,
        )
        .bind(owner_id)
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| sample_from_row(r, owner_id, metric))
            .collect())
    }

    /// History of one metric restricted to a window, oldest first.
    pub async fn history_in_window(
        &self,
        owner_id: i64,
        metric: MetricKey,
        window: &Window,
    ) -> Result<Vec<MetricSample>> {
        let end_op = if window.end_inclusive { "<=" } else { "<" };
        let sql = format!(
            "SELECT value, ts FROM metric_samples \
             WHERE owner_id = ? AND metric_key = ? AND ts >= ? AND ts {end_op} ? \
             ORDER BY ts ASC, id ASC"
        );

        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .bind(metric.as_str())
            .bind(window.start.timestamp())
            .bind(window.end.timestamp())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|r| sample_from_row(r, owner_id, metric))
            .collect())
    }

    /// Most recent samples across all metrics, newest first.
    pub async fn recent_samples(&self, owner_id: i64, limit: u32) -> Result<Vec<MetricSample>> {
        let rows = sqlx::query(
            r#"
            SELECT metric_key, value, ts
            FROM metric_samples
            WHERE owner_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let key: String = r.get("metric_key");
                let metric = parse_or_warn::<MetricKey>(&key)?;
                Some(sample_from_row(r, owner_id, metric))
            })
            .collect())
    }

    /// Timestamps of every sample an owner has logged, newest first.
    pub async fn sample_times(&self, owner_id: i64) -> Result<Vec<DateTime<Utc>>> {
        let rows = sqlx::query(
            r#"
            SELECT ts FROM metric_samples
            WHERE owner_id = ?
            ORDER BY ts DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| from_ts(r.get("ts"))).collect())
    }

    // ------------------------------------------------------------------------
    // Goals
    // ------------------------------------------------------------------------

    pub async fn list_goals(&self, owner_id: i64) -> Result<Vec<Goal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, metric_key, target_value, period_kind
            FROM goals
            WHERE owner_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(goal_from_row).collect())
    }

    /// Insert a goal or overwrite the target of the existing (owner, metric, period) goal.
    pub async fn upsert_goal(
        &self,
        owner_id: i64,
        metric: MetricKey,
        target_value: f64,
        period: PeriodKind,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO goals (owner_id, metric_key, target_value, period_kind)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (owner_id, metric_key, period_kind)
            DO UPDATE SET target_value = excluded.target_value
            RETURNING id
            "#,
        )
        .bind(owner_id)
        .bind(metric.as_str())
        .bind(target_value)
        .bind(period.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    pub async fn delete_goal(&self, goal_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM goals WHERE id = ?")
            .bind(goal_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------------
    // Challenges
    // ------------------------------------------------------------------------

    /// Insert a challenge unless one with the same name exists. Returns its id either way.
    pub async fn seed_challenge(&self, challenge: &NewChallenge) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO challenges (name, description, challenge_type, goal_value, reward_points)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&challenge.name)
        .bind(&challenge.description)
        .bind(challenge.challenge_type.as_str())
        .bind(challenge.goal_value)
        .bind(challenge.reward_points)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM challenges WHERE name = ?")
            .bind(&challenge.name)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("id"))
    }

    pub async fn list_challenges(&self) -> Result<Vec<Challenge>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, challenge_type, goal_value, reward_points
            FROM challenges
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(challenge_from_row).collect())
    }

    pub async fn get_challenge(&self, challenge_id: i64) -> Result<Option<Challenge>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, challenge_type, goal_value, reward_points
            FROM challenges
            WHERE id = ?
            "#,
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(challenge_from_row))
    }

    pub async fn get_progress(
        &self,
        owner_id: i64,
        challenge_id: i64,
    ) -> Result<Option<ChallengeProgress>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, challenge_id, progress, completed
            FROM challenge_progress
            WHERE owner_id = ? AND challenge_id = ?
            "#,
        )
        .bind(owner_id)
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(progress_from_row))
    }

    /// Incomplete challenges ordered by how close they are to their goal.
    pub async fn nearly_completed(
        &self,
        owner_id: i64,
        limit: u32,
    ) -> Result<Vec<(Challenge, ChallengeProgress)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.description, c.challenge_type, c.goal_value, c.reward_points,
                   p.owner_id, p.challenge_id, p.progress, p.completed
            FROM challenge_progress p
            JOIN challenges c ON c.id = p.challenge_id
            WHERE p.owner_id = ? AND p.completed = 0
            ORDER BY p.progress / c.goal_value DESC, c.id ASC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (challenge_from_row(r), progress_from_row(r)))
            .collect())
    }

    // ------------------------------------------------------------------------
    // Points and rewards
    // ------------------------------------------------------------------------

    /// Current balance, or `None` for an unknown owner.
    pub async fn points(&self, owner_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT points FROM owners WHERE id = ?")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("points")))
    }

    pub async fn list_claims(&self, owner_id: i64) -> Result<Vec<RewardClaim>> {
        let rows = sqlx::query(
            r#"
            SELECT reward_id, reward_name, claimed_at
            FROM reward_claims
            WHERE owner_id = ?
            ORDER BY claimed_at ASC, reward_id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| RewardClaim {
                reward_id: r.get("reward_id"),
                reward_name: r.get("reward_name"),
                claimed_at: from_ts(r.get("claimed_at")),
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Leaderboards
    // ------------------------------------------------------------------------

    /// Opted-in owners ranked by the sum of a metric since `since` (all time when `None`).
    pub async fn metric_totals(
        &self,
        metric: MetricKey,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<(i64, String, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.display_name, SUM(s.value) AS total
            FROM metric_samples s
            JOIN owners o ON o.id = s.owner_id
            WHERE o.show_on_leaderboard = 1 AND s.metric_key = ? AND s.ts >= ?
            GROUP BY o.id, o.display_name
            ORDER BY total DESC, o.id ASC
            LIMIT ?
            "#,
        )
        .bind(metric.as_str())
        .bind(since.map_or(i64::MIN, |t| t.timestamp()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("id"), r.get("display_name"), r.get("total")))
            .collect())
    }

    /// Opted-in owners ranked by points balance.
    pub async fn top_points(&self, limit: u32) -> Result<Vec<(i64, String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, points
            FROM owners
            WHERE show_on_leaderboard = 1
            ORDER BY points DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("id"), r.get("display_name"), r.get("points")))
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Transactional writes
// ----------------------------------------------------------------------------

/// Fetch the progress row for update, creating it (progress 0, not completed) if absent.
pub async fn lock_progress_row(
    conn: &mut SqliteConnection,
    owner_id: i64,
    challenge_id: i64,
) -> Result<(ChallengeProgress, bool)> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO challenge_progress (owner_id, challenge_id, progress, completed)
        VALUES (?, ?, 0, 0)
        ON CONFLICT (owner_id, challenge_id) DO NOTHING
        "#,
    )
    .bind(owner_id)
    .bind(challenge_id)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    let row = sqlx::query(
        r#"
        SELECT owner_id, challenge_id, progress, completed
        FROM challenge_progress
        WHERE owner_id = ? AND challenge_id = ?
        "#,
    )
    .bind(owner_id)
    .bind(challenge_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok((progress_from_row(&row), inserted))
}

pub async fn set_progress(
    conn: &mut SqliteConnection,
    owner_id: i64,
    challenge_id: i64,
    progress: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE challenge_progress SET progress = ?
        WHERE owner_id = ? AND challenge_id = ?
        "#,
    )
    .bind(progress)
    .bind(owner_id)
    .bind(challenge_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Flip `completed` from false to true. Returns whether this call performed the transition.
pub async fn mark_completed(
    conn: &mut SqliteConnection,
    owner_id: i64,
    challenge_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE challenge_progress SET completed = 1
        WHERE owner_id = ? AND challenge_id = ? AND completed = 0
        "#,
    )
    .bind(owner_id)
    .bind(challenge_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn read_points(conn: &mut SqliteConnection, owner_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT points FROM owners WHERE id = ?")
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| r.get("points"))
        .ok_or_else(|| TrackerError::not_found(format!("owner {owner_id}")))
}

/// Add `amount` to a balance. Returns the new balance.
pub async fn add_points(conn: &mut SqliteConnection, owner_id: i64, amount: i64) -> Result<i64> {
    let row = sqlx::query("UPDATE owners SET points = points + ? WHERE id = ? RETURNING points")
        .bind(amount)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| r.get("points"))
        .ok_or_else(|| TrackerError::not_found(format!("owner {owner_id}")))
}

/// Overwrite a balance.
pub async fn write_points(conn: &mut SqliteConnection, owner_id: i64, value: i64) -> Result<()> {
    let result = sqlx::query("UPDATE owners SET points = ? WHERE id = ?")
        .bind(value)
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(TrackerError::not_found(format!("owner {owner_id}")));
    }
    Ok(())
}

/// Record a claim. Returns false if the owner already claimed this reward.
pub async fn insert_claim(
    conn: &mut SqliteConnection,
    owner_id: i64,
    reward_id: &str,
    reward_name: &str,
    claimed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO reward_claims (owner_id, reward_id, reward_name, claimed_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (owner_id, reward_id) DO NOTHING
        "#,
    )
    .bind(owner_id)
    .bind(reward_id)
    .bind(reward_name)
    .bind(claimed_at.timestamp())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

// ----------------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------------

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn parse_or_warn<T: std::str::FromStr>(raw: &str) -> Option<T> {
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(value = %raw, "Skipping row with unrecognised key");
            None
        }
    }
}

fn sample_from_row(row: &SqliteRow, owner_id: i64, metric: MetricKey) -> MetricSample {
    MetricSample {
        owner_id,
        metric,
        value: row.get("value"),
        recorded_at: from_ts(row.get("ts")),
    }
}

fn goal_from_row(row: &SqliteRow) -> Option<Goal> {
    let metric: String = row.get("metric_key");
    let period: String = row.get("period_kind");
    Some(Goal {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        metric: parse_or_warn(&metric)?,
        target_value: row.get("target_value"),
        period: PeriodKind::parse_lenient(&period),
    })
}

fn challenge_from_row(row: &SqliteRow) -> Challenge {
    let challenge_type: String = row.get("challenge_type");
    Challenge {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        challenge_type: PeriodKind::parse_lenient(&challenge_type),
        goal_value: row.get("goal_value"),
        reward_points: row.get("reward_points"),
    }
}

fn progress_from_row(row: &SqliteRow) -> ChallengeProgress {
    ChallengeProgress {
        owner_id: row.get("owner_id"),
        challenge_id: row.get("challenge_id"),
        progress: row.get("progress"),
        completed: row.get("completed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::{Zone, resolve_period};
    use chrono::TimeZone;

    async fn setup() -> (Storage, i64) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let owner = storage.create_owner("ada", true).await.unwrap();
        (storage, owner)
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, h, 0, 0).unwrap()
    }

    fn sample(owner_id: i64, metric: MetricKey, value: f64, recorded_at: DateTime<Utc>) -> MetricSample {
        MetricSample {
            owner_id,
            metric,
            value,
            recorded_at,
        }
    }

    #[tokio::test]
    async fn test_history_is_ordered_and_scoped() {
        let (storage, owner) = setup().await;
        let other = storage.create_owner("bob", true).await.unwrap();

        storage.insert_sample(&sample(owner, MetricKey::StepsTaken, 2.0, at(14, 10))).await.unwrap();
        storage.insert_sample(&sample(owner, MetricKey::StepsTaken, 1.0, at(14, 8))).await.unwrap();
        storage.insert_sample(&sample(owner, MetricKey::Weight, 80.0, at(14, 9))).await.unwrap();
        storage.insert_sample(&sample(other, MetricKey::StepsTaken, 9.0, at(14, 9))).await.unwrap();

        let history = storage.history(owner, MetricKey::StepsTaken).await.unwrap();
        let values: Vec<f64> = history.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
        assert_eq!(history[0].recorded_at, at(14, 8));
    }

    #[tokio::test]
    async fn test_history_in_window_is_half_open() {
        let (storage, owner) = setup().await;
        let window = resolve_period(at(14, 12), PeriodKind::Daily, Zone::utc()).unwrap();

        storage.insert_sample(&sample(owner, MetricKey::StepsTaken, 1.0, window.start)).await.unwrap();
        storage.insert_sample(&sample(owner, MetricKey::StepsTaken, 2.0, window.end)).await.unwrap();

        let samples = storage
            .history_in_window(owner, MetricKey::StepsTaken, &window)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 1.0);
    }

    #[tokio::test]
    async fn test_upsert_goal_overwrites_target() {
        let (storage, owner) = setup().await;

        let first = storage
            .upsert_goal(owner, MetricKey::StepsTaken, 5000.0, PeriodKind::Daily)
            .await
            .unwrap();
        let second = storage
            .upsert_goal(owner, MetricKey::StepsTaken, 8000.0, PeriodKind::Daily)
            .await
            .unwrap();
        storage
            .upsert_goal(owner, MetricKey::StepsTaken, 40000.0, PeriodKind::Weekly)
            .await
            .unwrap();

        assert_eq!(first, second);
        let goals = storage.list_goals(owner).await.unwrap();
        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].target_value, 8000.0);

        assert!(storage.delete_goal(first).await.unwrap());
        assert!(!storage.delete_goal(first).await.unwrap());
    }

    #[tokio::test]
    async fn test_seed_challenge_is_idempotent() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let challenge = NewChallenge {
            name: "Daily Steps".to_string(),
            description: "Walk".to_string(),
            challenge_type: PeriodKind::Daily,
            goal_value: 10000.0,
            reward_points: 50,
        };

        let a = storage.seed_challenge(&challenge).await.unwrap();
        let b = storage.seed_challenge(&challenge).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(storage.list_challenges().await.unwrap().len(), 1);
        let loaded = storage.get_challenge(a).await.unwrap().unwrap();
        assert_eq!(loaded.challenge_type, PeriodKind::Daily);
    }

    #[tokio::test]
    async fn test_mark_completed_only_once() {
        let (storage, owner) = setup().await;
        let challenge = storage
            .seed_challenge(&NewChallenge {
                name: "Weekly Steps".to_string(),
                description: "Walk".to_string(),
                challenge_type: PeriodKind::Weekly,
                goal_value: 100.0,
                reward_points: 10,
            })
            .await
            .unwrap();

        let mut tx = storage.begin().await.unwrap();
        let (row, created) = lock_progress_row(&mut tx, owner, challenge).await.unwrap();
        assert!(created);
        assert!(!row.completed);
        assert!(mark_completed(&mut tx, owner, challenge).await.unwrap());
        assert!(!mark_completed(&mut tx, owner, challenge).await.unwrap());
        tx.commit().await.unwrap();

        let row = storage.get_progress(owner, challenge).await.unwrap().unwrap();
        assert!(row.completed);
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_rolls_back() {
        let (storage, owner) = setup().await;

        {
            let mut tx = storage.begin().await.unwrap();
            add_points(&mut tx, owner, 50).await.unwrap();
        }

        assert_eq!(storage.points(owner).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_points_and_claims() {
        let (storage, owner) = setup().await;

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(add_points(&mut tx, owner, 120).await.unwrap(), 120);
        write_points(&mut tx, owner, 20).await.unwrap();
        assert!(insert_claim(&mut tx, owner, "stepper", "Golden Stepper Badge", at(14, 9)).await.unwrap());
        assert!(!insert_claim(&mut tx, owner, "stepper", "Golden Stepper Badge", at(14, 10)).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(storage.points(owner).await.unwrap(), Some(20));
        assert_eq!(storage.points(9999).await.unwrap(), None);
        let claims = storage.list_claims(owner).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].claimed_at, at(14, 9));
    }

    #[tokio::test]
    async fn test_unknown_owner_points_not_found() {
        let (storage, _) = setup().await;
        let mut tx = storage.begin().await.unwrap();
        let err = add_points(&mut tx, 4242, 10).await.unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_metric_totals_respect_opt_in() {
        let (storage, owner) = setup().await;
        let hidden = storage.create_owner("hidden", false).await.unwrap();

        storage.insert_sample(&sample(owner, MetricKey::StepsTaken, 100.0, at(14, 9))).await.unwrap();
        storage.insert_sample(&sample(owner, MetricKey::StepsTaken, 50.0, at(1, 9))).await.unwrap();
        storage.insert_sample(&sample(hidden, MetricKey::StepsTaken, 999.0, at(14, 9))).await.unwrap();

        let all = storage.metric_totals(MetricKey::StepsTaken, None, 5).await.unwrap();
        assert_eq!(all, vec![(owner, "ada".to_string(), 150.0)]);

        let recent = storage
            .metric_totals(MetricKey::StepsTaken, Some(at(10, 0)), 5)
            .await
            .unwrap();
        assert_eq!(recent[0].2, 100.0);
    }
}
