use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    DEFAULT_USER, Goals, NewObservation, Observation, UpdateObservation, UserProfile,
    validate_goals, validate_user_name,
};
use crate::stats::{HistoryView, UserHistory, compute_history};

const OBSERVATION_COLUMNS: &str = "o.id, o.uuid, u.name, o.date, o.weight, o.body_fat, o.waist, o.created_at, o.updated_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run `f` inside one transaction. Any error rolls back everything `f` wrote.
    ///
    /// Not reentrant: `f` must not call methods that open their own
    /// transaction, such as [`Database::delete_user`].
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            info!("initializing database schema");
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    start_weight REAL,
                    goal_weight REAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS observations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    date TEXT NOT NULL,
                    weight REAL NOT NULL,
                    body_fat REAL,
                    waist REAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_observations_user_date ON observations(user_id, date);

                PRAGMA user_version = 1;",
            )?;

            // A fresh store always has somebody to log for
            let now = Local::now().to_rfc3339();
            self.conn.execute(
                "INSERT OR IGNORE INTO users (name, created_at, updated_at) VALUES (?1, ?2, ?3)",
                params![DEFAULT_USER, now, now],
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserProfile> {
        Ok(UserProfile {
            id: row.get(0)?,
            name: row.get(1)?,
            start_weight: row.get(2)?,
            goal_weight: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    // Expects OBSERVATION_COLUMNS order.
    fn observation_from_row(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
        let date_str: String = row.get(3)?;
        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Observation {
            id: row.get(0)?,
            uuid: row.get(1)?,
            user: row.get(2)?,
            date,
            weight: row.get(4)?,
            body_fat: row.get(5)?,
            waist: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    // --- Users ---

    pub fn list_users(&self) -> Result<Vec<UserProfile>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, start_weight, goal_weight, created_at, updated_at
             FROM users ORDER BY id",
        )?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn get_user(&self, name: &str) -> Result<Option<UserProfile>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, name, start_weight, goal_weight, created_at, updated_at
                 FROM users WHERE name = ?1",
                params![name],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn require_user(&self, name: &str) -> Result<UserProfile> {
        self.get_user(name)?
            .with_context(|| format!("User '{name}' not found"))
    }

    pub fn add_user(&self, name: &str) -> Result<UserProfile> {
        let name = validate_user_name(name)?;
        if self.get_user(&name)?.is_some() {
            bail!("User '{name}' already exists");
        }
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (name, created_at, updated_at) VALUES (?1, ?2, ?3)",
            params![name, now, now],
        )?;
        info!(user = %name, "added user");
        self.require_user(&name)
    }

    /// Delete a user and every observation they own.
    ///
    /// Returns the number of observations removed. The last remaining user
    /// cannot be deleted.
    pub fn delete_user(&self, name: &str) -> Result<usize> {
        let user = self.require_user(name)?;
        let user_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if user_count <= 1 {
            bail!("Cannot delete the last user");
        }

        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM observations WHERE user_id = ?1",
            params![user.id],
        )?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![user.id])?;
        tx.commit()?;

        info!(user = %name, observations = removed, "deleted user");
        Ok(removed)
    }

    pub fn get_goals(&self, name: &str) -> Result<Goals> {
        Ok(self.require_user(name)?.goals())
    }

    pub fn set_goals(&self, name: &str, goals: &Goals) -> Result<UserProfile> {
        validate_goals(goals)?;
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE users SET start_weight = ?1, goal_weight = ?2, updated_at = ?3 WHERE name = ?4",
            params![goals.start_weight, goals.goal_weight, now, name],
        )?;
        if rows == 0 {
            bail!("Could not find user '{name}' to update");
        }
        self.require_user(name)
    }

    // --- Observations ---

    pub fn add_observation(&self, entry: &NewObservation) -> Result<Observation> {
        entry.validate()?;
        let user = self.require_user(&entry.user)?;
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        let date_str = entry.date.format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT INTO observations (uuid, user_id, date, weight, body_fat, waist, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid,
                user.id,
                date_str,
                entry.weight,
                entry.body_fat,
                entry.waist,
                now,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, user = %user.name, "added observation");
        self.get_observation(id)?
            .context("Observation not found after insert")
    }

    pub fn get_observation(&self, id: i64) -> Result<Option<Observation>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {OBSERVATION_COLUMNS}
                     FROM observations o JOIN users u ON u.id = o.user_id
                     WHERE o.id = ?1"
                ),
                params![id],
                Self::observation_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn update_observation(&self, id: i64, update: &UpdateObservation) -> Result<Observation> {
        update.validate()?;
        let now = Local::now().to_rfc3339();
        let date_str = update.date.format("%Y-%m-%d").to_string();
        let rows = self.conn.execute(
            "UPDATE observations
             SET date = ?1, weight = ?2, body_fat = ?3, waist = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                date_str,
                update.weight,
                update.body_fat,
                update.waist,
                now,
                id
            ],
        )?;
        if rows == 0 {
            bail!("Observation {id} not found");
        }
        self.get_observation(id)?
            .with_context(|| format!("Observation {id} not found"))
    }

    pub fn delete_observation(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM observations WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// A user's observations, oldest first; same-date entries in insertion order.
    pub fn list_observations(&self, name: &str) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS}
             FROM observations o JOIN users u ON u.id = o.user_id
             WHERE u.name = ?1
             ORDER BY o.date, o.id"
        ))?;
        let entries = stmt
            .query_map(params![name], Self::observation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn all_observations(&self) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS}
             FROM observations o JOIN users u ON u.id = o.user_id
             ORDER BY u.id, o.date, o.id"
        ))?;
        let entries = stmt
            .query_map([], Self::observation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // --- History view ---

    pub fn build_history_view(
        &self,
        primary: &str,
        comparison: Option<&str>,
    ) -> Result<HistoryView> {
        let primary_user = self.require_user(primary)?;
        let primary_entries = self.list_observations(primary)?;

        let comparison_data = match comparison {
            Some(name) => {
                let user = self.require_user(name)?;
                let entries = self.list_observations(name)?;
                Some((user, entries))
            }
            None => None,
        };

        let primary_history = UserHistory {
            name: &primary_user.name,
            observations: &primary_entries,
            goals: primary_user.goals(),
        };
        let comparison_history = comparison_data.as_ref().map(|(user, entries)| UserHistory {
            name: &user.name,
            observations: entries,
            goals: user.goals(),
        });

        Ok(compute_history(
            &primary_history,
            comparison_history.as_ref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::GoalClass;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_entry(user: &str, day: &str, weight: f64) -> NewObservation {
        NewObservation {
            user: user.to_string(),
            date: date(day),
            weight,
            body_fat: None,
            waist: None,
        }
    }

    #[test]
    fn test_fresh_database_has_default_user() {
        let db = Database::open_in_memory().unwrap();
        let users = db.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, DEFAULT_USER);
        assert!(users[0].start_weight.is_none());
        assert!(users[0].goal_weight.is_none());
    }

    #[test]
    fn test_reopen_file_database_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weighin.db");

        {
            let db = Database::open(&path).unwrap();
            db.add_user("Alice").unwrap();
            db.add_observation(&new_entry("Alice", "2024-01-01", 180.0))
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let users = db.list_users().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(db.list_observations("Alice").unwrap().len(), 1);
    }

    #[test]
    fn test_add_user() {
        let db = Database::open_in_memory().unwrap();
        let user = db.add_user("  Alice ").unwrap();
        assert_eq!(user.name, "Alice");

        let names: Vec<String> = db.list_users().unwrap().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec![DEFAULT_USER.to_string(), "Alice".to_string()]);
    }

    #[test]
    fn test_add_user_duplicate_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Alice").unwrap();
        let err = db.add_user("Alice").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_user_names_are_case_sensitive() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("alice").unwrap();
        db.add_user("Alice").unwrap();
        assert_eq!(db.list_users().unwrap().len(), 3);
        assert!(db.get_user("ALICE").unwrap().is_none());
    }

    #[test]
    fn test_add_user_empty_name_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.add_user("   ").is_err());
    }

    #[test]
    fn test_set_and_get_goals() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Alice").unwrap();

        let goals = Goals {
            start_weight: Some(200.0),
            goal_weight: Some(170.0),
        };
        let user = db.set_goals("Alice", &goals).unwrap();
        assert_eq!(user.start_weight, Some(200.0));
        assert_eq!(db.get_goals("Alice").unwrap(), goals);

        // Clearing goals is allowed
        db.set_goals("Alice", &Goals::default()).unwrap();
        assert_eq!(db.get_goals("Alice").unwrap(), Goals::default());
    }

    #[test]
    fn test_set_goals_unknown_user() {
        let db = Database::open_in_memory().unwrap();
        let err = db.set_goals("Nobody", &Goals::default()).unwrap_err();
        assert!(err.to_string().contains("Nobody"));
    }

    #[test]
    fn test_set_goals_rejects_non_positive() {
        let db = Database::open_in_memory().unwrap();
        let goals = Goals {
            start_weight: Some(-1.0),
            goal_weight: None,
        };
        assert!(db.set_goals(DEFAULT_USER, &goals).is_err());
    }

    #[test]
    fn test_add_and_get_observation() {
        let db = Database::open_in_memory().unwrap();
        let mut entry = new_entry(DEFAULT_USER, "2024-03-01", 181.4);
        entry.body_fat = Some(22.0);
        entry.waist = Some(35.5);

        let created = db.add_observation(&entry).unwrap();
        assert_eq!(created.user, DEFAULT_USER);
        assert_eq!(created.date, date("2024-03-01"));
        assert!((created.weight - 181.4).abs() < f64::EPSILON);
        assert_eq!(created.body_fat, Some(22.0));
        assert_eq!(created.waist, Some(35.5));
        assert!(!created.uuid.is_empty());

        let fetched = db.get_observation(created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_add_observation_unknown_user() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .add_observation(&new_entry("Ghost", "2024-01-01", 150.0))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_add_observation_rejects_invalid_weight() {
        let db = Database::open_in_memory().unwrap();
        assert!(
            db.add_observation(&new_entry(DEFAULT_USER, "2024-01-01", 0.0))
                .is_err()
        );
        assert!(db.list_observations(DEFAULT_USER).unwrap().is_empty());
    }

    #[test]
    fn test_list_observations_ordered_and_filtered() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Bob").unwrap();
        let a = db
            .add_observation(&new_entry(DEFAULT_USER, "2024-01-03", 178.0))
            .unwrap();
        let b = db
            .add_observation(&new_entry(DEFAULT_USER, "2024-01-01", 180.0))
            .unwrap();
        let c = db
            .add_observation(&new_entry(DEFAULT_USER, "2024-01-03", 177.5))
            .unwrap();
        db.add_observation(&new_entry("Bob", "2024-01-02", 150.0))
            .unwrap();

        let ids: Vec<i64> = db
            .list_observations(DEFAULT_USER)
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);

        assert_eq!(db.list_observations("Bob").unwrap().len(), 1);
        assert!(db.list_observations("Nobody").unwrap().is_empty());
    }

    #[test]
    fn test_update_observation() {
        let db = Database::open_in_memory().unwrap();
        let created = db
            .add_observation(&new_entry(DEFAULT_USER, "2024-01-01", 180.0))
            .unwrap();

        let updated = db
            .update_observation(
                created.id,
                &UpdateObservation {
                    date: date("2024-01-02"),
                    weight: 179.0,
                    body_fat: Some(20.0),
                    waist: None,
                },
            )
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.uuid, created.uuid);
        assert_eq!(updated.date, date("2024-01-02"));
        assert!((updated.weight - 179.0).abs() < f64::EPSILON);
        assert_eq!(updated.body_fat, Some(20.0));
    }

    #[test]
    fn test_update_observation_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .update_observation(
                9999,
                &UpdateObservation {
                    date: date("2024-01-01"),
                    weight: 150.0,
                    body_fat: None,
                    waist: None,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_delete_observation_keeps_other_ids_stable() {
        let db = Database::open_in_memory().unwrap();
        let first = db
            .add_observation(&new_entry(DEFAULT_USER, "2024-01-01", 180.0))
            .unwrap();
        let second = db
            .add_observation(&new_entry(DEFAULT_USER, "2024-01-02", 179.0))
            .unwrap();

        assert!(db.delete_observation(first.id).unwrap());
        assert!(!db.delete_observation(first.id).unwrap());

        let remaining = db.get_observation(second.id).unwrap().unwrap();
        assert_eq!(remaining, second);
    }

    #[test]
    fn test_delete_last_user_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db.delete_user(DEFAULT_USER).unwrap_err();
        assert!(err.to_string().contains("last user"));
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_unknown_user() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Alice").unwrap();
        assert!(db.delete_user("Nobody").is_err());
        assert_eq!(db.list_users().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_user_cascades_only_their_observations() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Alice").unwrap();
        db.add_user("Bob").unwrap();
        db.set_goals(
            "Bob",
            &Goals {
                start_weight: Some(160.0),
                goal_weight: Some(150.0),
            },
        )
        .unwrap();
        db.add_observation(&new_entry("Alice", "2024-01-01", 180.0))
            .unwrap();
        db.add_observation(&new_entry("Alice", "2024-01-02", 179.0))
            .unwrap();
        db.add_observation(&new_entry("Bob", "2024-01-01", 155.0))
            .unwrap();

        let bob_before = db.build_history_view("Bob", None).unwrap();

        let removed = db.delete_user("Alice").unwrap();
        assert_eq!(removed, 2);
        assert!(db.get_user("Alice").unwrap().is_none());
        assert!(db.list_observations("Alice").unwrap().is_empty());
        assert_eq!(db.all_observations().unwrap().len(), 1);

        let bob_after = db.build_history_view("Bob", None).unwrap();
        assert_eq!(bob_before, bob_after);
    }

    #[test]
    fn test_all_observations_grouped_by_user() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Bob").unwrap();
        db.add_observation(&new_entry("Bob", "2024-01-01", 150.0))
            .unwrap();
        db.add_observation(&new_entry(DEFAULT_USER, "2024-01-05", 180.0))
            .unwrap();

        let all = db.all_observations().unwrap();
        let users: Vec<&str> = all.iter().map(|o| o.user.as_str()).collect();
        assert_eq!(users, vec![DEFAULT_USER, "Bob"]);
    }

    #[test]
    fn test_build_history_view() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Bob").unwrap();
        db.set_goals(
            DEFAULT_USER,
            &Goals {
                start_weight: Some(185.0),
                goal_weight: Some(170.0),
            },
        )
        .unwrap();
        db.add_observation(&new_entry(DEFAULT_USER, "2024-01-01", 180.0))
            .unwrap();
        db.add_observation(&new_entry("Bob", "2024-01-02", 150.0))
            .unwrap();

        let view = db.build_history_view(DEFAULT_USER, Some("Bob")).unwrap();
        assert_eq!(view.summary.current, Some(180.0));
        let progress = view.summary.to_goal.unwrap();
        assert_eq!(progress.label, "lose 10.0 lbs");
        assert_eq!(progress.class, GoalClass::Negative);
        assert_eq!(view.weight_chart.labels.len(), 2);
        assert_eq!(
            view.axes.secondary_label.as_deref(),
            Some("Bob Weight (lbs)")
        );
    }

    #[test]
    fn test_build_history_view_unknown_user() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.build_history_view("Nobody", None).is_err());
        assert!(db.build_history_view(DEFAULT_USER, Some("Nobody")).is_err());
    }

    #[test]
    fn test_summary_bounds_hold_after_edits_and_deletes() {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<i64> = [
            ("2024-01-01", 190.0),
            ("2024-01-02", 185.0),
            ("2024-01-03", 182.0),
            ("2024-01-03", 181.0),
            ("2024-01-05", 183.0),
        ]
        .into_iter()
        .map(|(day, w)| db.add_observation(&new_entry(DEFAULT_USER, day, w)).unwrap().id)
        .collect();

        let check = |db: &Database| {
            let s = db.build_history_view(DEFAULT_USER, None).unwrap().summary;
            if let (Some(lo), Some(cur), Some(hi)) = (s.lowest, s.current, s.highest) {
                assert!(lo <= cur && cur <= hi, "{lo} <= {cur} <= {hi}");
            }
        };
        check(&db);

        // Latest entry becomes a new low, then a new high
        for weight in [150.0, 210.0] {
            db.update_observation(
                ids[4],
                &UpdateObservation {
                    date: date("2024-01-05"),
                    weight,
                    body_fat: None,
                    waist: None,
                },
            )
            .unwrap();
            check(&db);
        }

        // Move an old entry past the latest
        db.update_observation(
            ids[0],
            &UpdateObservation {
                date: date("2024-01-09"),
                weight: 140.0,
                body_fat: None,
                waist: None,
            },
        )
        .unwrap();
        check(&db);
        let summary = db.build_history_view(DEFAULT_USER, None).unwrap().summary;
        assert_eq!(summary.current, Some(140.0));
        assert_eq!(summary.lowest, Some(140.0));

        for id in &ids {
            assert!(db.delete_observation(*id).unwrap());
            check(&db);
        }
        let summary = db.build_history_view(DEFAULT_USER, None).unwrap().summary;
        assert!(summary.current.is_none());
        assert!(summary.lowest.is_none());
        assert!(summary.highest.is_none());
    }
}
