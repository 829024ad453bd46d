use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::models::{
    Application, ApplicationStatus, AutomationStep, CandidateProfile, DailySummary, NormalizedJob,
    Preferences, ScoredListing,
};
use crate::scoring::ScoreResult;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, path: PathBuf::from(":memory:") };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "pursuit") {
            Ok(proj_dirs.data_dir().join("pursuit.db"))
        } else {
            Ok(PathBuf::from("pursuit.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS profile (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL,
                resume_text TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS preferences (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                salary_min INTEGER,
                salary_max INTEGER,
                job_type TEXT NOT NULL DEFAULT '',
                source_name TEXT NOT NULL,
                external_id TEXT NOT NULL DEFAULT '',
                posted_at TEXT,
                match_score INTEGER NOT NULL DEFAULT 0,
                score_breakdown TEXT NOT NULL DEFAULT '{}',
                matched_keywords TEXT NOT NULL DEFAULT '[]',
                url_hash TEXT NOT NULL UNIQUE,
                dismissed INTEGER NOT NULL DEFAULT 0,
                discovered_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id INTEGER NOT NULL UNIQUE REFERENCES listings(id),
                status TEXT NOT NULL DEFAULT 'queued'
                    CHECK (status IN ('queued', 'generating_cover', 'applying', 'applied', 'failed')),
                cover_letter TEXT NOT NULL DEFAULT '',
                applied_via TEXT NOT NULL DEFAULT '',
                error_message TEXT NOT NULL DEFAULT '',
                retry_count INTEGER NOT NULL DEFAULT 0,
                automation_log TEXT NOT NULL DEFAULT '[]',
                applied_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS daily_summaries (
                date TEXT PRIMARY KEY,
                jobs_discovered INTEGER NOT NULL DEFAULT 0,
                applications_sent INTEGER NOT NULL DEFAULT 0,
                applications_failed INTEGER NOT NULL DEFAULT 0,
                high_score_jobs INTEGER NOT NULL DEFAULT 0,
                summary_text TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_listings_score ON listings(match_score);
            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='listings'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'pursuit init' first."));
        }
        Ok(())
    }

    // --- Profile ---

    pub fn save_profile(&self, profile: &CandidateProfile, resume_text: &str) -> Result<()> {
        let data = serde_json::to_string(profile)?;
        self.conn.execute(
            "INSERT INTO profile (id, data, resume_text) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = ?1, resume_text = ?2, updated_at = datetime('now')",
            params![data, resume_text],
        )?;
        Ok(())
    }

    pub fn get_profile(&self) -> Result<Option<(CandidateProfile, String)>> {
        let result = self.conn.query_row(
            "SELECT data, resume_text FROM profile WHERE id = 1",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );
        match result {
            Ok((data, resume_text)) => {
                let profile = serde_json::from_str(&data).context("Corrupt profile record")?;
                Ok(Some((profile, resume_text)))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // --- Preferences ---

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        let data = serde_json::to_string(prefs)?;
        self.conn.execute(
            "INSERT INTO preferences (id, data) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET data = ?1, updated_at = datetime('now')",
            [data],
        )?;
        Ok(())
    }

    pub fn get_preferences(&self) -> Result<Preferences> {
        let result = self.conn.query_row(
            "SELECT data FROM preferences WHERE id = 1",
            [],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(data) => serde_json::from_str(&data).context("Corrupt preferences record"),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Preferences::default()),
            Err(e) => Err(e.into()),
        }
    }

    // --- Listings ---

    /// Insert a scored listing keyed by its url_hash. Returns the new row id,
    /// or None when the hash is already present (re-discovery is a no-op:
    /// neither the job data nor the stored score is touched).
    pub fn upsert_listing(
        &self,
        job: &NormalizedJob,
        hash: &str,
        scoring: &ScoreResult,
    ) -> Result<Option<i64>> {
        let breakdown = serde_json::to_string(&scoring.breakdown)?;
        let matched = serde_json::to_string(&scoring.matched_keywords)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO listings
             (title, company, location, url, description, salary_min, salary_max,
              job_type, source_name, external_id, posted_at,
              match_score, score_breakdown, matched_keywords, url_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.title,
                job.company,
                job.location,
                job.canonical_url,
                job.description,
                job.salary_min,
                job.salary_max,
                job.job_type,
                job.source_name,
                job.external_id,
                job.posted_at,
                scoring.score,
                breakdown,
                matched,
                hash,
            ],
        )?;
        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    pub fn listing_exists(&self, hash: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE url_hash = ?1",
            [hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_listing(&self, id: i64) -> Result<Option<ScoredListing>> {
        let result = self.conn.query_row(
            &format!("{} WHERE id = ?1", Self::LISTING_SELECT),
            [id],
            Self::row_to_listing,
        );
        match result {
            Ok(listing) => Ok(Some(listing)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_listings(&self, min_score: Option<i32>, limit: usize) -> Result<Vec<ScoredListing>> {
        let mut sql = format!("{} WHERE dismissed = 0", Self::LISTING_SELECT);
        if min_score.is_some() {
            sql.push_str(" AND match_score >= ?1");
        }
        sql.push_str(" ORDER BY match_score DESC, discovered_at DESC LIMIT ");
        sql.push_str(&limit.to_string());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(score) = min_score {
            stmt.query_map([score], Self::row_to_listing)?
        } else {
            stmt.query_map([], Self::row_to_listing)?
        };
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list listings")
    }

    pub fn all_listings(&self) -> Result<Vec<ScoredListing>> {
        let mut stmt = self.conn.prepare(Self::LISTING_SELECT)?;
        let rows = stmt.query_map([], Self::row_to_listing)?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to load listings")
    }

    pub fn dismiss_listing(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("UPDATE listings SET dismissed = 1 WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(anyhow!("Listing #{} not found", id));
        }
        Ok(())
    }

    /// Explicit rescore of one listing (the `rescore` command; never invoked
    /// by discovery).
    pub fn update_listing_score(&self, id: i64, scoring: &ScoreResult) -> Result<()> {
        let breakdown = serde_json::to_string(&scoring.breakdown)?;
        let matched = serde_json::to_string(&scoring.matched_keywords)?;
        self.conn.execute(
            "UPDATE listings SET match_score = ?1, score_breakdown = ?2, matched_keywords = ?3
             WHERE id = ?4",
            params![scoring.score, breakdown, matched, id],
        )?;
        Ok(())
    }

    /// Listings at or above the threshold with no application yet.
    pub fn qualifying_listings(&self, threshold: i32) -> Result<Vec<ScoredListing>> {
        let sql = format!(
            "{} WHERE dismissed = 0 AND match_score >= ?1
               AND id NOT IN (SELECT listing_id FROM applications)
             ORDER BY match_score DESC",
            Self::LISTING_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([threshold], Self::row_to_listing)?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to load qualifying listings")
    }

    const LISTING_SELECT: &'static str =
        "SELECT id, title, company, location, url, description, salary_min, salary_max,
                job_type, source_name, external_id, posted_at,
                match_score, score_breakdown, matched_keywords, url_hash, dismissed, discovered_at
         FROM listings";

    fn row_to_listing(row: &rusqlite::Row) -> rusqlite::Result<ScoredListing> {
        let breakdown_raw: String = row.get(13)?;
        let matched_raw: String = row.get(14)?;
        let breakdown: BTreeMap<String, i32> =
            serde_json::from_str(&breakdown_raw).unwrap_or_default();
        let matched_keywords: Vec<String> = serde_json::from_str(&matched_raw).unwrap_or_default();
        Ok(ScoredListing {
            id: row.get(0)?,
            job: NormalizedJob {
                title: row.get(1)?,
                company: row.get(2)?,
                location: row.get(3)?,
                canonical_url: row.get(4)?,
                description: row.get(5)?,
                salary_min: row.get(6)?,
                salary_max: row.get(7)?,
                job_type: row.get(8)?,
                source_name: row.get(9)?,
                external_id: row.get(10)?,
                posted_at: row.get(11)?,
            },
            match_score: row.get(12)?,
            score_breakdown: breakdown,
            matched_keywords,
            url_hash: row.get(15)?,
            dismissed: row.get::<_, i64>(16)? != 0,
            discovered_at: row.get(17)?,
        })
    }

    // --- Applications ---

    /// Create a queued application for a listing. Returns None if one already
    /// exists (applications are never duplicated per listing).
    pub fn create_application(&self, listing_id: i64) -> Result<Option<i64>> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO applications (listing_id) VALUES (?1)",
            [listing_id],
        )?;
        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    pub fn get_application(&self, id: i64) -> Result<Option<Application>> {
        let result = self.conn.query_row(
            &format!("{} WHERE id = ?1", Self::APPLICATION_SELECT),
            [id],
            Self::row_to_application,
        );
        match result {
            Ok(app) => Ok(Some(app)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_applications(&self, status: Option<ApplicationStatus>) -> Result<Vec<Application>> {
        let mut sql = Self::APPLICATION_SELECT.to_string();
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(" ORDER BY created_at DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s.as_str()], Self::row_to_application)?
        } else {
            stmt.query_map([], Self::row_to_application)?
        };
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list applications")
    }

    pub fn set_application_status(&self, id: i64, status: ApplicationStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE applications SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub fn set_cover_letter(&self, id: i64, cover_letter: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE applications SET cover_letter = ?1 WHERE id = ?2",
            params![cover_letter, id],
        )?;
        Ok(())
    }

    /// Record the terminal outcome of one attempt, including the step log.
    pub fn record_attempt_outcome(
        &self,
        id: i64,
        status: ApplicationStatus,
        applied_via: &str,
        error_message: &str,
        log: &[AutomationStep],
    ) -> Result<()> {
        let log_json = serde_json::to_string(log)?;
        // applied_at only advances on success; failures keep any earlier value.
        if status == ApplicationStatus::Applied {
            self.conn.execute(
                "UPDATE applications
                 SET status = ?1, applied_via = ?2, error_message = ?3,
                     automation_log = ?4, applied_at = datetime('now')
                 WHERE id = ?5",
                params![status.as_str(), applied_via, error_message, log_json, id],
            )?;
        } else {
            self.conn.execute(
                "UPDATE applications
                 SET status = ?1, applied_via = ?2, error_message = ?3, automation_log = ?4
                 WHERE id = ?5",
                params![status.as_str(), applied_via, error_message, log_json, id],
            )?;
        }
        Ok(())
    }

    /// Explicit retry: failed -> queued, bounded by the caller.
    pub fn requeue_application(&self, id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE applications
             SET status = 'queued', retry_count = retry_count + 1, error_message = ''
             WHERE id = ?1 AND status = 'failed'",
            [id],
        )?;
        if changed == 0 {
            return Err(anyhow!("Application #{} is not in 'failed' state", id));
        }
        Ok(())
    }

    pub fn queued_applications(&self) -> Result<Vec<Application>> {
        self.list_applications(Some(ApplicationStatus::Queued))
    }

    /// Applications created today, for daily-cap enforcement.
    pub fn count_applications_today(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM applications WHERE date(created_at) = date('now')",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_applications_today_with_status(&self, status: ApplicationStatus) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM applications
             WHERE date(created_at) = date('now') AND status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    const APPLICATION_SELECT: &'static str =
        "SELECT id, listing_id, status, cover_letter, applied_via, error_message,
                retry_count, automation_log, applied_at, created_at
         FROM applications";

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        let status_raw: String = row.get(2)?;
        let log_raw: String = row.get(7)?;
        Ok(Application {
            id: row.get(0)?,
            listing_id: row.get(1)?,
            status: ApplicationStatus::parse(&status_raw).unwrap_or(ApplicationStatus::Failed),
            cover_letter: row.get(3)?,
            applied_via: row.get(4)?,
            error_message: row.get(5)?,
            retry_count: row.get(6)?,
            automation_log: serde_json::from_str(&log_raw).unwrap_or_default(),
            applied_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    // --- Daily summaries ---

    pub fn upsert_daily_summary(&self, summary: &DailySummary) -> Result<()> {
        self.conn.execute(
            "INSERT INTO daily_summaries
             (date, jobs_discovered, applications_sent, applications_failed,
              high_score_jobs, summary_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(date) DO UPDATE SET
                jobs_discovered = ?2, applications_sent = ?3,
                applications_failed = ?4, high_score_jobs = ?5, summary_text = ?6",
            params![
                summary.date,
                summary.jobs_discovered,
                summary.applications_sent,
                summary.applications_failed,
                summary.high_score_jobs,
                summary.summary_text,
            ],
        )?;
        Ok(())
    }

    pub fn get_daily_summary(&self, date: &str) -> Result<Option<DailySummary>> {
        let result = self.conn.query_row(
            "SELECT date, jobs_discovered, applications_sent, applications_failed,
                    high_score_jobs, summary_text
             FROM daily_summaries WHERE date = ?1",
            [date],
            |row| {
                Ok(DailySummary {
                    date: row.get(0)?,
                    jobs_discovered: row.get(1)?,
                    applications_sent: row.get(2)?,
                    applications_failed: row.get(3)?,
                    high_score_jobs: row.get(4)?,
                    summary_text: row.get(5)?,
                })
            },
        );
        match result {
            Ok(summary) => Ok(Some(summary)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
