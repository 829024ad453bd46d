use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::ai;
use crate::ats::{ApplyEngine, ApplyError};
use crate::browser::PageSession;
use crate::config::{BrowserBackend, Config};
use crate::db::Database;
use crate::gateway::GatewaySession;
use crate::models::{
    ApplicationStatus, AutomationStep, CandidateProfile, DailySummary, ScoredListing,
    ScreeningOverride,
};
use crate::scoring;
use crate::sources::{self, RateLimiter, SourceCache};
use crate::verify::{CodeResolver, ImapMailbox, MailboxSearch, VerificationOutcome};
use crate::webdriver::WebDriverSession;

/// Explicit-retry bound; `failed -> queued` never happens automatically.
pub const MAX_RETRIES: i32 = 3;

const PER_SOURCE_LIMIT: usize = 20;
const SOURCE_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Timing knobs for an attempt. Defaults are production values; tests dial
/// them down.
#[derive(Debug, Clone)]
pub struct AttemptTuning {
    pub jitter: (u64, u64),
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for AttemptTuning {
    fn default() -> Self {
        Self {
            jitter: (1500, 3500),
            poll_attempts: crate::verify::POLL_ATTEMPTS,
            poll_interval: crate::verify::POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
pub struct DiscoveryStats {
    pub total_discovered: usize,
    pub new_listings: usize,
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct ProcessStats {
    pub applied: usize,
    pub failed: usize,
}

pub(crate) struct AttemptResult {
    status: ApplicationStatus,
    applied_via: String,
    error_message: String,
    log: Vec<AutomationStep>,
}

pub struct Pipeline {
    pub(crate) db: Database,
    pub(crate) config: Config,
    pub(crate) tuning: AttemptTuning,
}

impl Pipeline {
    pub fn new(db: Database, config: Config) -> Self {
        Self { db, config, tuning: AttemptTuning::default() }
    }

    // --- Discovery ---

    /// Search all enabled sources, score new postings, and store them.
    /// Idempotent with respect to storage: previously-seen canonical URLs are
    /// skipped outright and their stored scores are never recomputed.
    pub async fn discover(&self) -> Result<DiscoveryStats> {
        self.db.ensure_initialized()?;
        let prefs = self.db.get_preferences()?;
        let (profile, _) = self.db.get_profile()?.unwrap_or_default();
        if profile.skills.is_empty() {
            warn!("no profile imported yet; scoring will rely on preference keywords only");
        }

        let client = sources::http_client()?;
        let cache = Arc::new(SourceCache::default());
        let limiter = Arc::new(RateLimiter::new(SOURCE_MIN_INTERVAL));
        let outcome = sources::discover_sources(
            &client,
            &self.config.sources,
            &prefs,
            cache,
            limiter,
            PER_SOURCE_LIMIT,
        )
        .await;

        let mut stats = DiscoveryStats {
            total_discovered: outcome.jobs.len(),
            new_listings: 0,
            failures: outcome
                .failures
                .into_iter()
                .map(|(source, e)| (source, e.to_string()))
                .collect(),
        };

        for job in &outcome.jobs {
            if job.canonical_url.is_empty() {
                continue;
            }
            let hash = scoring::url_hash(&job.canonical_url);
            if self.db.listing_exists(&hash)? {
                continue;
            }
            let scored = scoring::score_listing(job, &profile, &prefs);
            if self.db.upsert_listing(job, &hash, &scored)?.is_some() {
                stats.new_listings += 1;
            }
        }

        info!(
            discovered = stats.total_discovered,
            new = stats.new_listings,
            failed_sources = stats.failures.len(),
            "discovery complete"
        );
        Ok(stats)
    }

    /// Recompute scores for retained listings with the current profile and
    /// preferences. Only ever triggered explicitly by the user.
    pub fn rescore(&self) -> Result<usize> {
        self.db.ensure_initialized()?;
        let prefs = self.db.get_preferences()?;
        let (profile, _) = self.db.get_profile()?.unwrap_or_default();
        let listings = self.db.all_listings()?;
        let count = listings.len();
        for listing in listings {
            let scored = scoring::score_listing(&listing.job, &profile, &prefs);
            self.db.update_listing_score(listing.id, &scored)?;
        }
        Ok(count)
    }

    // --- Queueing ---

    /// Queue listings at or above the auto-apply threshold, bounded by the
    /// daily cap. Check-then-act on the cap is acceptably racy at this
    /// system's single-operator concurrency.
    pub fn queue_eligible(&self) -> Result<usize> {
        self.db.ensure_initialized()?;
        let prefs = self.db.get_preferences()?;
        let today = self.db.count_applications_today()?;
        let remaining = (prefs.daily_application_cap - today).max(0) as usize;
        if remaining == 0 {
            info!(cap = prefs.daily_application_cap, "daily application cap reached");
            return Ok(0);
        }

        let qualifying = self.db.qualifying_listings(prefs.auto_apply_threshold)?;
        let mut queued = 0;
        for listing in qualifying.into_iter().take(remaining) {
            if self.db.create_application(listing.id)?.is_some() {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Queue a single listing on user request (threshold does not apply; the
    /// cap still counts it).
    pub fn queue_listing(&self, listing_id: i64) -> Result<i64> {
        self.db.ensure_initialized()?;
        let listing = self
            .db
            .get_listing(listing_id)?
            .ok_or_else(|| anyhow!("Listing #{} not found", listing_id))?;
        match self.db.create_application(listing.id)? {
            Some(id) => Ok(id),
            None => Err(anyhow!("Listing #{} already has an application", listing_id)),
        }
    }

    // --- Application processing ---

    /// Process every queued application, strictly one at a time; each attempt
    /// gets its own browser session.
    pub async fn process_queue(&self) -> Result<ProcessStats> {
        let queue = self.db.queued_applications()?;
        let mut stats = ProcessStats::default();
        for app in queue {
            match self.process_application(app.id).await {
                Ok(ApplicationStatus::Applied) => stats.applied += 1,
                Ok(_) => stats.failed += 1,
                Err(e) => {
                    warn!(application = app.id, error = %e, "processing error");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Full lifecycle for one application:
    /// queued -> generating_cover -> applying -> {applied | failed}.
    pub async fn process_application(&self, id: i64) -> Result<ApplicationStatus> {
        let app = self
            .db
            .get_application(id)?
            .ok_or_else(|| anyhow!("Application #{} not found", id))?;
        let listing = self
            .db
            .get_listing(app.listing_id)?
            .ok_or_else(|| anyhow!("Listing #{} not found", app.listing_id))?;
        let (profile, resume_text) = self
            .db
            .get_profile()?
            .ok_or_else(|| anyhow!("No candidate profile imported. Run 'pursuit profile' first."))?;
        let prefs = self.db.get_preferences()?;

        // Cover letter first; failure downgrades to an empty letter and the
        // pipeline proceeds.
        let cover_letter = if app.cover_letter.is_empty() {
            self.db.set_application_status(id, ApplicationStatus::GeneratingCover)?;
            match self.generate_cover(&resume_text, &listing).await {
                Ok(text) => {
                    self.db.set_cover_letter(id, &text)?;
                    text
                }
                Err(e) => {
                    info!(application = id, error = %e, "cover letter skipped");
                    String::new()
                }
            }
        } else {
            app.cover_letter.clone()
        };

        self.db.set_application_status(id, ApplicationStatus::Applying)?;

        // A backend that cannot even start is a clean failure: no form was
        // touched, nothing to confirm.
        let mut session: Box<dyn PageSession> = match self.start_session().await {
            Ok(session) => session,
            Err(e) => {
                let message = format!("browser backend unavailable: {}", e);
                self.db.record_attempt_outcome(id, ApplicationStatus::Failed, "", &message, &[])?;
                return Ok(ApplicationStatus::Failed);
            }
        };

        let mailbox = ImapMailbox::from_config(&self.config.mailbox).ok();
        let result = self
            .run_attempt(
                session.as_mut(),
                mailbox.as_ref().map(|m| m as &dyn MailboxSearch),
                &listing,
                &profile,
                &cover_letter,
                &prefs.screening_overrides,
            )
            .await;

        // Sessions are torn down on every path; a leak is a defect.
        if let Err(e) = session.stop().await {
            warn!(error = %e, "session teardown failed");
        }

        self.db.record_attempt_outcome(
            id,
            result.status,
            &result.applied_via,
            &result.error_message,
            &result.log,
        )?;
        info!(
            application = id,
            status = %result.status,
            via = %result.applied_via,
            "attempt recorded"
        );
        Ok(result.status)
    }

    /// Drive the form-filling engine and classify the outcome. Never panics
    /// through: every automation error ends up as a recorded status.
    pub(crate) async fn run_attempt(
        &self,
        session: &mut dyn PageSession,
        mailbox: Option<&dyn MailboxSearch>,
        listing: &ScoredListing,
        profile: &CandidateProfile,
        cover_letter: &str,
        overrides: &[ScreeningOverride],
    ) -> AttemptResult {
        let mut engine = ApplyEngine::new(
            &mut *session,
            profile,
            cover_letter,
            &self.config.resume_file,
            overrides,
        )
        .with_jitter(self.tuning.jitter.0, self.tuning.jitter.1);

        match engine.run(&listing.job.canonical_url).await {
            Ok(outcome) => {
                let method = outcome.method.clone();
                let mut log = engine.into_log();
                if !outcome.pending_verification {
                    return AttemptResult {
                        status: ApplicationStatus::Applied,
                        applied_via: method,
                        error_message: outcome.note.unwrap_or_default(),
                        log,
                    };
                }

                // Code challenge. Losing a submitted application to a mail
                // timeout is worse than surfacing a warning, so every branch
                // below stays `applied`.
                let error_message = match mailbox {
                    Some(mailbox) => {
                        let mut resolver = CodeResolver::new(mailbox);
                        resolver.attempts = self.tuning.poll_attempts;
                        resolver.interval = self.tuning.poll_interval;
                        match resolver.resolve(session, &mut log).await {
                            VerificationOutcome::Verified => String::new(),
                            VerificationOutcome::CodeEntered => {
                                "verification code entered - confirm receipt manually".to_string()
                            }
                            VerificationOutcome::TimedOut => {
                                "application submitted but verification code not received - \
                                 pending external verification"
                                    .to_string()
                            }
                        }
                    }
                    None => "application submitted - pending external verification \
                             (mailbox not configured)"
                        .to_string(),
                };
                AttemptResult {
                    status: ApplicationStatus::Applied,
                    applied_via: method,
                    error_message,
                    log,
                }
            }
            Err(e) => {
                // A session that died after the submit click is partial
                // progress: the form likely went through, so this is a
                // probable success needing human confirmation, not a failure
                // that would trigger a pointless reapplication.
                let submitted = engine
                    .log()
                    .iter()
                    .any(|s| s.step == "submit" && s.action == "click");
                let log = engine.into_log();
                if submitted && matches!(e, ApplyError::Session(_)) {
                    return AttemptResult {
                        status: ApplicationStatus::Applied,
                        applied_via: "manual".to_string(),
                        error_message: format!(
                            "automation interrupted after submit ({}) - confirm manually",
                            e
                        ),
                        log,
                    };
                }
                AttemptResult {
                    status: ApplicationStatus::Failed,
                    applied_via: String::new(),
                    error_message: e.to_string(),
                    log,
                }
            }
        }
    }

    async fn generate_cover(&self, resume_text: &str, listing: &ScoredListing) -> Result<String> {
        let provider = ai::create_provider(&self.config.ai)?;
        ai::generate_cover_letter(
            provider.as_ref(),
            resume_text,
            &listing.job.title,
            &listing.job.company,
            &listing.job.description,
        )
        .await
    }

    async fn start_session(&self) -> Result<Box<dyn PageSession>, crate::browser::SessionError> {
        match self.config.browser.backend {
            BrowserBackend::Webdriver => {
                Ok(Box::new(WebDriverSession::start(&self.config.browser).await?))
            }
            BrowserBackend::Gateway => {
                Ok(Box::new(GatewaySession::start(&self.config.browser).await?))
            }
        }
    }

    // --- Retry ---

    /// Explicit, bounded retry of a failed application.
    pub async fn retry(&self, id: i64) -> Result<ApplicationStatus> {
        let app = self
            .db
            .get_application(id)?
            .ok_or_else(|| anyhow!("Application #{} not found", id))?;
        if app.retry_count >= MAX_RETRIES {
            return Err(anyhow!(
                "Application #{} already retried {} times (limit {})",
                id,
                app.retry_count,
                MAX_RETRIES
            ));
        }
        self.db.requeue_application(id)?;
        self.process_application(id).await
    }

    // --- Daily run ---

    /// Full daily pipeline: discover, queue up to the cap, process the
    /// queue, write the day's summary row.
    pub async fn run_daily(&self) -> Result<DailySummary> {
        let discovery = self.discover().await?;
        let queued = self.queue_eligible()?;
        let processed = self.process_queue().await?;

        let prefs = self.db.get_preferences()?;
        let applied =
            self.db.count_applications_today_with_status(ApplicationStatus::Applied)?;
        let failed = self.db.count_applications_today_with_status(ApplicationStatus::Failed)?;
        let high_score = self.db.list_listings(Some(prefs.auto_apply_threshold), 10_000)?.len();

        let summary = DailySummary {
            date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            jobs_discovered: discovery.new_listings as i64,
            applications_sent: applied,
            applications_failed: failed,
            high_score_jobs: high_score as i64,
            summary_text: format!(
                "Jobs Discovered: {}\nApplications Queued: {}\nApplied: {}\nFailed: {}\n",
                discovery.new_listings, queued, applied, failed
            ),
        };
        self.db.upsert_daily_summary(&summary)?;
        info!(queued, applied = processed.applied, failed = processed.failed, "daily run complete");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedJob;
    use crate::scoring::ScoreResult;
    use crate::testutil::{
        button, element, file_input, required_select, text_input, FakePage, FakeSession,
    };
    use crate::verify::MailSummary;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct EmptyMailbox;

    #[async_trait]
    impl MailboxSearch for EmptyMailbox {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<MailSummary>> {
            Ok(Vec::new())
        }
        async fn body(&self, _id: &str) -> Result<String> {
            Err(anyhow!("no such message"))
        }
    }

    fn fast_pipeline() -> Pipeline {
        let db = Database::open_in_memory().unwrap();
        let mut config = Config::default();
        config.resume_file = "/tmp/resume.pdf".to_string();
        let mut pipeline = Pipeline::new(db, config);
        pipeline.tuning = AttemptTuning {
            jitter: (1, 2),
            poll_attempts: 2,
            poll_interval: Duration::from_millis(5),
        };
        pipeline
    }

    fn store_listing(pipeline: &Pipeline, url: &str, score: i32) -> ScoredListing {
        let job = NormalizedJob {
            title: "Junior Developer".to_string(),
            company: "Acme".to_string(),
            location: "Remote".to_string(),
            canonical_url: url.to_string(),
            description: "Django and React".to_string(),
            salary_min: None,
            salary_max: None,
            job_type: String::new(),
            source_name: "remoteok".to_string(),
            external_id: "1".to_string(),
            posted_at: None,
        };
        let scored = ScoreResult {
            score,
            breakdown: BTreeMap::new(),
            matched_keywords: Vec::new(),
        };
        let hash = scoring::url_hash(url);
        let id = pipeline.db.upsert_listing(&job, &hash, &scored).unwrap().unwrap();
        pipeline.db.get_listing(id).unwrap().unwrap()
    }

    fn profile() -> CandidateProfile {
        CandidateProfile {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "555-0100".to_string(),
            location: "Toronto, Ontario".to_string(),
            skills: vec!["Django".to_string()],
            ..Default::default()
        }
    }

    fn greenhouse_form_page(url: &str) -> FakePage {
        FakePage::new(
            url,
            "Apply for Junior Developer at Acme",
            vec![
                text_input("first", "First Name"),
                text_input("last", "Last Name"),
                text_input("email", "Email"),
                text_input("phone", "Phone"),
                required_select("visa", "Do you require visa sponsorship?"),
                required_select("country", "What country are you authorized to work in?"),
                file_input("resume", "Resume/CV"),
                element("cover", crate::browser::ElementRole::TextArea, "Cover Letter"),
                button("submit", "Submit Application"),
            ],
        )
    }

    /// A code-challenge submit that never gets its email: the attempt stays
    /// applied and the message flags the pending verification.
    #[tokio::test]
    async fn test_code_challenge_timeout_is_soft_success() {
        let pipeline = fast_pipeline();
        let url = "https://boards.greenhouse.io/acme/jobs/1";
        let listing = store_listing(&pipeline, url, 88);

        let challenge = FakePage::new(
            url,
            "Please enter the verification code sent to your email",
            vec![text_input("code_in", "Verification code"), button("verify", "Verify")],
        );
        let mut session = FakeSession::new()
            .page(greenhouse_form_page(url))
            .on_click_swap("submit", challenge);

        let mailbox = EmptyMailbox;
        let result = pipeline
            .run_attempt(&mut session, Some(&mailbox), &listing, &profile(), "Dear team", &[])
            .await;

        assert_eq!(result.status, ApplicationStatus::Applied);
        assert!(result.error_message.contains("pending external verification"));
        assert_eq!(result.applied_via, "greenhouse");

        // Ordering contract on the way through: sponsorship answered No,
        // country answered Canada.
        assert!(session.actions.iter().any(|a| a == "type:visa=No"));
        assert!(session.actions.iter().any(|a| a == "type:country=Canada"));
        assert!(session.actions.iter().any(|a| a.starts_with("upload:resume=")));

        // And the recorded outcome round-trips through the store.
        let app_id = pipeline.db.create_application(listing.id).unwrap().unwrap();
        pipeline
            .db
            .record_attempt_outcome(
                app_id,
                result.status,
                &result.applied_via,
                &result.error_message,
                &result.log,
            )
            .unwrap();
        let app = pipeline.db.get_application(app_id).unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Applied);
        assert!(app.error_message.contains("pending"));
        assert!(app.applied_at.is_some());
    }

    /// An aggregator page with no external destination never gets a submit
    /// attempt; it fails with the requires-login reason.
    #[tokio::test]
    async fn test_aggregator_dead_end_fails_with_requires_login() {
        let pipeline = fast_pipeline();
        let url = "https://www.linkedin.com/jobs/view/12345";
        let listing = store_listing(&pipeline, url, 80);

        let board_page = FakePage::new(
            url,
            "Sign in to apply for this job",
            vec![button("signin", "Sign in")],
        );
        let mut session = FakeSession::new().page(board_page);

        let result = pipeline
            .run_attempt(&mut session, None, &listing, &profile(), "", &[])
            .await;

        assert_eq!(result.status, ApplicationStatus::Failed);
        assert!(result.error_message.contains("requires login on LinkedIn"));
        assert!(!session.actions.iter().any(|a| a.starts_with("type:")));
    }

    /// A backend that dies after the submit click is a probable success:
    /// recorded as applied via manual, never as a silent failure.
    #[tokio::test]
    async fn test_session_death_after_submit_is_applied_via_manual() {
        let pipeline = fast_pipeline();
        let url = "https://careers.acme.example/jobs/1";
        let listing = store_listing(&pipeline, url, 80);

        // Snapshots: page_loaded, click_submit's fresh snapshot, then the
        // post-submit verification snapshot dies.
        let mut session = FakeSession::new()
            .page(greenhouse_form_page(url))
            .fail_snapshot_after(2);

        let result = pipeline
            .run_attempt(&mut session, None, &listing, &profile(), "", &[])
            .await;

        assert_eq!(result.status, ApplicationStatus::Applied);
        assert_eq!(result.applied_via, "manual");
        assert!(result.error_message.contains("confirm manually"));
    }

    #[tokio::test]
    async fn test_queue_respects_daily_cap() {
        let pipeline = fast_pipeline();
        let mut prefs = pipeline.db.get_preferences().unwrap();
        prefs.daily_application_cap = 1;
        prefs.auto_apply_threshold = 70;
        pipeline.db.save_preferences(&prefs).unwrap();

        store_listing(&pipeline, "https://a.test/1", 90);
        store_listing(&pipeline, "https://a.test/2", 85);

        assert_eq!(pipeline.queue_eligible().unwrap(), 1);
        // Cap consumed; a second pass queues nothing.
        assert_eq!(pipeline.queue_eligible().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_bounded() {
        let pipeline = fast_pipeline();
        let listing = store_listing(&pipeline, "https://a.test/retry", 90);
        let app_id = pipeline.db.create_application(listing.id).unwrap().unwrap();
        pipeline
            .db
            .record_attempt_outcome(app_id, ApplicationStatus::Failed, "", "boom", &[])
            .unwrap();

        // Burn through the retry budget without a browser: force the count up.
        for _ in 0..MAX_RETRIES {
            pipeline.db.requeue_application(app_id).unwrap();
            pipeline
                .db
                .record_attempt_outcome(app_id, ApplicationStatus::Failed, "", "boom", &[])
                .unwrap();
        }
        let err = pipeline.retry(app_id).await.unwrap_err();
        assert!(err.to_string().contains("retried"));
    }
}
