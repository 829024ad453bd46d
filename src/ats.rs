use std::time::Duration;

use regex::Regex;
use tracing::info;

use crate::browser::{ElementRole, PageElement, PageSession, PageSnapshot, SessionError, settle_delay};
use crate::models::{AutomationStep, CandidateProfile, ScreeningOverride};

/// Two submit attempts per application: the initial submit plus exactly one
/// repair-and-resubmit pass. A single documented constant on purpose.
pub const MAX_SUBMIT_ATTEMPTS: usize = 2;

/// Minimum meaningfully-filled fields before the engine will submit.
const FILL_THRESHOLD: usize = 2;

const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("browser session failed: {0}")]
    Session(#[from] SessionError),
    #[error("this job requires login on {0} - no external application destination found")]
    RequiresLogin(String),
    #[error("no supported application form found (only {0} fields filled)")]
    UnsupportedAts(usize),
    #[error("required fields still empty after repair pass: {0}")]
    ValidationRetryExhausted(String),
    #[error("no submit control found on the form")]
    NoSubmitControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtsVendor {
    Greenhouse,
    Lever,
    Workday,
    Ashby,
    SmartRecruiters,
    BambooHr,
    Icims,
    Jobvite,
    Recruitee,
    Breezy,
    ApplyToJob,
    Dover,
    Rippling,
    Generic,
}

impl AtsVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtsVendor::Greenhouse => "greenhouse",
            AtsVendor::Lever => "lever",
            AtsVendor::Workday => "workday",
            AtsVendor::Ashby => "ashby",
            AtsVendor::SmartRecruiters => "smartrecruiters",
            AtsVendor::BambooHr => "bamboohr",
            AtsVendor::Icims => "icims",
            AtsVendor::Jobvite => "jobvite",
            AtsVendor::Recruitee => "recruitee",
            AtsVendor::Breezy => "breezy",
            AtsVendor::ApplyToJob => "applytojob",
            AtsVendor::Dover => "dover",
            AtsVendor::Rippling => "rippling",
            AtsVendor::Generic => "generic",
        }
    }
}

/// Ordered vendor hostname/path patterns; first match wins. Specific hosts
/// (dedicated subdomains, short-link redirectors) come before bare domains.
const ATS_PATTERNS: &[(&str, AtsVendor)] = &[
    ("boards.greenhouse.io", AtsVendor::Greenhouse),
    ("job-boards.greenhouse.io", AtsVendor::Greenhouse),
    ("grnh.se", AtsVendor::Greenhouse),
    ("greenhouse.io", AtsVendor::Greenhouse),
    ("jobs.lever.co", AtsVendor::Lever),
    ("lever.co", AtsVendor::Lever),
    ("myworkdayjobs.com", AtsVendor::Workday),
    ("ashbyhq.com", AtsVendor::Ashby),
    ("jobs.ashby.com", AtsVendor::Ashby),
    ("smartrecruiters.com", AtsVendor::SmartRecruiters),
    ("bamboohr.com", AtsVendor::BambooHr),
    ("icims.com", AtsVendor::Icims),
    ("jobvite.com", AtsVendor::Jobvite),
    ("recruitee.com", AtsVendor::Recruitee),
    ("breezy.hr", AtsVendor::Breezy),
    ("applytojob.com", AtsVendor::ApplyToJob),
    ("dover.com", AtsVendor::Dover),
    ("rippling.com", AtsVendor::Rippling),
];

pub fn detect_ats(url: &str) -> AtsVendor {
    let url_lower = url.to_lowercase();
    for (pattern, vendor) in ATS_PATTERNS {
        if url_lower.contains(pattern) {
            return *vendor;
        }
    }
    AtsVendor::Generic
}

/// Aggregator domains the engine never tries to submit on.
const JOB_BOARDS: &[(&str, &str)] = &[
    ("linkedin.com", "LinkedIn"),
    ("indeed.com", "Indeed"),
    ("glassdoor.com", "Glassdoor"),
    ("remoteok.io", "RemoteOK"),
    ("remoteok.com", "RemoteOK"),
    ("news.ycombinator.com", "Hacker News"),
    ("weworkremotely.com", "We Work Remotely"),
];

pub fn job_board_name(url: &str) -> Option<&'static str> {
    let url_lower = url.to_lowercase();
    JOB_BOARDS
        .iter()
        .find(|(domain, _)| url_lower.contains(domain))
        .map(|(_, name)| *name)
}

// ---------------------------------------------------------------------------
// Screening question policy
// ---------------------------------------------------------------------------

/// Built-in screening answers, in evaluation order. Specific patterns must
/// come before broad ones: many sponsorship labels also contain "country",
/// so "country" sits last as the catch-all. Patterns containing ".*" are
/// evaluated as regexes.
pub fn default_screening_rules() -> Vec<ScreeningOverride> {
    [
        ("visa sponsorship", "No"),
        ("visa sponsor", "No"),
        ("require.*visa", "No"),
        ("sponsorship", "No"),
        ("visa", "No"),
        ("interviewed before", "No"),
        ("interviewed at", "No"),
        // Country-selection questions, before the yes/no authorization
        // patterns that would otherwise shadow them.
        ("what country", "Canada"),
        ("which country", "Canada"),
        ("authorized to work", "Yes"),
        ("authorization to work", "Yes"),
        ("legally authorized", "Yes"),
        ("relocation", "Yes"),
        ("in-person", "Yes"),
        ("in person", "Yes"),
        ("office", "Yes"),
        ("hear about", "Job board"),
        ("policy", "Yes"),
        ("country", "Canada"), // must stay last; many labels contain "country"
    ]
    .into_iter()
    .map(|(pattern, answer)| ScreeningOverride {
        pattern: pattern.to_string(),
        answer: answer.to_string(),
    })
    .collect()
}

/// Demographic/EEO labels that are never auto-answered.
const SKIP_LABELS: &[&str] =
    &["gender", "race", "ethnicity", "hispanic", "veteran", "disability", "pronouns"];

pub fn is_demographic_question(label: &str) -> bool {
    let label_lower = label.to_lowercase();
    SKIP_LABELS.iter().any(|skip| label_lower.contains(skip))
}

/// First matching rule wins; evaluation order is the contract.
pub fn answer_for_question<'a>(label: &str, rules: &'a [ScreeningOverride]) -> Option<&'a str> {
    let label_lower = label.to_lowercase();
    for rule in rules {
        if rule.pattern.contains(".*") {
            if let Ok(re) = Regex::new(&rule.pattern) {
                if re.is_match(&label_lower) {
                    return Some(&rule.answer);
                }
            }
        } else if label_lower.contains(&rule.pattern) {
            return Some(&rule.answer);
        }
    }
    None
}

/// Answer for a required selection the rule table knows nothing about; used
/// only by the repair pass, where leaving the field empty means certain
/// rejection.
const DEFAULT_SELECT_ANSWER: &str = "Yes";

const SUBMIT_LABELS: &[&str] = &[
    "Submit Application",
    "Submit application",
    "Submit",
    "Apply Now",
    "Send Application",
    "Complete Application",
    "Apply",
];

const SUCCESS_PHRASES: &[&str] = &[
    "application submitted",
    "thank you for applying",
    "thanks for applying",
    "application received",
    "successfully submitted",
    "we received your application",
    "application has been submitted",
    "you have applied",
];

const CODE_CHALLENGE_PHRASES: &[&str] = &["security code", "verification code"];

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Vendor tag of the handler that submitted the form.
    pub method: String,
    /// The page asked for an emailed verification code after submit.
    pub pending_verification: bool,
    pub note: Option<String>,
}

/// Drives one application attempt end-to-end against the abstract session.
/// Sequential by construction: one engine, one session, one attempt.
pub struct ApplyEngine<'a> {
    session: &'a mut dyn PageSession,
    profile: &'a CandidateProfile,
    cover_letter: &'a str,
    resume_file: &'a str,
    rules: Vec<ScreeningOverride>,
    /// Jitter bounds in ms after navigations and clicks.
    jitter: (u64, u64),
    log: Vec<AutomationStep>,
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl<'a> ApplyEngine<'a> {
    pub fn new(
        session: &'a mut dyn PageSession,
        profile: &'a CandidateProfile,
        cover_letter: &'a str,
        resume_file: &'a str,
        overrides: &[ScreeningOverride],
    ) -> Self {
        // User overrides are consulted before the built-in table.
        let mut rules = overrides.to_vec();
        rules.extend(default_screening_rules());
        Self {
            session,
            profile,
            cover_letter,
            resume_file,
            rules,
            jitter: (1500, 3500),
            log: Vec::new(),
        }
    }

    pub fn with_jitter(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.jitter = (min_ms, max_ms);
        self
    }

    pub fn log(&self) -> &[AutomationStep] {
        &self.log
    }

    pub fn into_log(self) -> Vec<AutomationStep> {
        self.log
    }

    fn record(&mut self, step: &str, action: &str, element_ref: &str, result: &str) {
        info!(step, action, result, "apply");
        self.log.push(AutomationStep {
            step: step.to_string(),
            action: action.to_string(),
            element_ref: element_ref.to_string(),
            result: result.to_string(),
            timestamp: now_ts(),
        });
    }

    async fn settle(&mut self) {
        settle_delay(self.jitter.0, self.jitter.1).await;
    }

    /// start -> resolve_destination -> detect_ats -> fill_fields -> submit ->
    /// verify_outcome.
    pub async fn run(&mut self, job_url: &str) -> Result<ApplyOutcome, ApplyError> {
        self.record("navigate", "open_url", "", job_url);
        self.session.navigate(job_url, NAVIGATE_TIMEOUT).await?;
        self.settle().await;

        let snapshot = self.session.snapshot().await?;
        self.record("navigate", "page_loaded", "", &snapshot.url);

        let snapshot = self.resolve_destination(snapshot).await?;
        let vendor = detect_ats(&snapshot.url);
        self.record("detect", "ats", "", vendor.as_str());

        let snapshot = self.enter_form(vendor, snapshot).await?;
        let (filled, uploaded) = self.fill_fields(vendor, &snapshot).await?;

        let gate_met = filled >= FILL_THRESHOLD || (vendor == AtsVendor::Workday && uploaded);
        if !gate_met {
            self.record("fill", "threshold", "", &format!("only {} fields filled", filled));
            return Err(ApplyError::UnsupportedAts(filled));
        }

        self.submit_and_verify(vendor).await
    }

    /// Follow an "apply on company site" affordance off aggregator pages.
    /// Never attempts a credentialed login on a third-party board.
    async fn resolve_destination(
        &mut self,
        snapshot: PageSnapshot,
    ) -> Result<PageSnapshot, ApplyError> {
        let Some(board) = job_board_name(&snapshot.url) else {
            return Ok(snapshot);
        };
        self.record("resolve", "job_board", "", &format!("on {} - looking for external destination", board));

        // 1. An explicit external-apply affordance.
        if let Some(el) = snapshot.find_labeled(
            &[ElementRole::Link, ElementRole::Button],
            &["apply on company site", "apply on company", "apply on"],
        ) {
            if is_external_destination(&el.href) {
                return self.follow_external(&el.href.clone()).await;
            }
            let ref_id = el.ref_id.clone();
            self.record("resolve", "click_affordance", &ref_id, "activating apply affordance");
            self.session.click(&ref_id).await?;
            self.settle().await;
            let after = self.session.snapshot().await?;
            if job_board_name(&after.url).is_none() {
                self.record("resolve", "arrived", "", &after.url);
                return Ok(after);
            }
        }

        // 2. Any external link that looks like a career destination.
        if let Some(href) = snapshot
            .elements
            .iter()
            .filter(|e| e.role == ElementRole::Link && is_external_destination(&e.href))
            .find(|e| {
                let haystack = format!("{} {}", e.label, e.href).to_lowercase();
                ["career", "jobs", "apply", "greenhouse", "lever", "workday", "ashby"]
                    .iter()
                    .any(|kw| haystack.contains(kw))
            })
            .map(|e| e.href.clone())
        {
            return self.follow_external(&href).await;
        }

        // 3. A plain Apply control that may redirect off the board.
        if let Some(el) =
            snapshot.find_labeled(&[ElementRole::Button, ElementRole::Link], &["apply"])
        {
            let ref_id = el.ref_id.clone();
            self.record("resolve", "click_apply", &ref_id, "trying generic apply control");
            self.session.click(&ref_id).await?;
            self.settle().await;
            let after = self.session.snapshot().await?;
            if job_board_name(&after.url).is_none() {
                self.record("resolve", "arrived", "", &after.url);
                return Ok(after);
            }
        }

        self.record("resolve", "dead_end", "", &format!("still on {}", board));
        Err(ApplyError::RequiresLogin(board.to_string()))
    }

    async fn follow_external(&mut self, href: &str) -> Result<PageSnapshot, ApplyError> {
        self.record("resolve", "follow_link", "", href);
        self.session.navigate(href, NAVIGATE_TIMEOUT).await?;
        self.settle().await;
        let after = self.session.snapshot().await?;
        self.record("resolve", "arrived", "", &after.url);
        Ok(after)
    }

    /// Vendor-specific steps needed before the form is fillable.
    async fn enter_form(
        &mut self,
        vendor: AtsVendor,
        snapshot: PageSnapshot,
    ) -> Result<PageSnapshot, ApplyError> {
        let pre_click: &[&str] = match vendor {
            AtsVendor::Lever => &["apply for this job"],
            AtsVendor::Workday => &["apply manually", "apply without", "apply"],
            AtsVendor::SmartRecruiters => &["apply now", "apply"],
            AtsVendor::Greenhouse | AtsVendor::Ashby => &[],
            // Generic pages often hide the form behind an Apply control;
            // only click when no text input is visible yet.
            _ => {
                if snapshot.elements.iter().any(|e| e.role == ElementRole::TextInput) {
                    &[]
                } else {
                    &["apply now", "apply for this", "apply"]
                }
            }
        };

        if pre_click.is_empty() {
            return Ok(snapshot);
        }
        let target = snapshot
            .find_labeled(&[ElementRole::Button, ElementRole::Link], pre_click)
            .map(|el| (el.ref_id.clone(), el.label.clone()));
        let Some((ref_id, label)) = target else {
            return Ok(snapshot);
        };
        self.record(vendor.as_str(), "open_form", &ref_id, &label);
        self.session.click(&ref_id).await?;
        self.settle().await;

        // Workday offers "Apply Manually" only after the first Apply click.
        if vendor == AtsVendor::Workday {
            let after = self.session.snapshot().await?;
            if let Some(manual) = after.find_labeled(
                &[ElementRole::Button, ElementRole::Link],
                &["apply manually", "apply without"],
            ) {
                let manual_ref = manual.ref_id.clone();
                self.record("workday", "apply_manually", &manual_ref, "skipping account sign-in");
                self.session.click(&manual_ref).await?;
                self.settle().await;
            }
        }

        Ok(self.session.snapshot().await?)
    }

    async fn fill_fields(
        &mut self,
        vendor: AtsVendor,
        snapshot: &PageSnapshot,
    ) -> Result<(usize, bool), ApplyError> {
        let mut uploaded = false;

        // Workday parses the resume server-side and pre-fills from it, so the
        // upload goes first and gets extra settle time.
        if vendor == AtsVendor::Workday {
            uploaded = self.upload_resume(snapshot).await?;
            if uploaded {
                self.settle().await;
                self.settle().await;
            }
        }

        let snapshot = if uploaded { self.session.snapshot().await? } else { snapshot.clone() };

        let mut filled = self.fill_standard_fields(&snapshot).await?;
        filled += self.fill_screening_questions(&snapshot).await?;

        if vendor != AtsVendor::Workday {
            uploaded = self.upload_resume(&snapshot).await?;
        }
        self.fill_cover_letter(&snapshot).await?;

        Ok((filled, uploaded))
    }

    /// Map visible text inputs to profile data by label. Returns fill count.
    async fn fill_standard_fields(&mut self, snapshot: &PageSnapshot) -> Result<usize, ApplyError> {
        let mut filled = 0;
        for el in &snapshot.elements {
            if el.role != ElementRole::TextInput || !el.value.is_empty() || el.label.is_empty() {
                continue;
            }
            if is_demographic_question(&el.label) {
                continue;
            }
            let Some(value) = map_field_to_profile(&el.label, self.profile) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let ref_id = el.ref_id.clone();
            let label = el.label.clone();
            self.session.type_text(&ref_id, &value).await?;
            self.record("fill", "type", &ref_id, &format!("filled \"{}\"", label));
            settle_delay(self.jitter.0 / 4, self.jitter.1 / 4).await;
            filled += 1;
        }
        Ok(filled)
    }

    /// Answer dropdown/checkbox screening questions from the rule table.
    /// Demographic questions are skipped, never auto-answered.
    async fn fill_screening_questions(
        &mut self,
        snapshot: &PageSnapshot,
    ) -> Result<usize, ApplyError> {
        let mut filled = 0;
        for el in &snapshot.elements {
            if el.label.is_empty() || is_demographic_question(&el.label) {
                continue;
            }
            match el.role {
                ElementRole::Select => {
                    if !el.value.is_empty() {
                        continue;
                    }
                    let Some(answer) =
                        answer_for_question(&el.label, &self.rules).map(str::to_string)
                    else {
                        continue;
                    };
                    let ref_id = el.ref_id.clone();
                    let label = el.label.clone();
                    // Open the dropdown, then type to filter; vendors with
                    // combobox-style selects match on the typed text.
                    self.session.click(&ref_id).await?;
                    self.session.type_text(&ref_id, &answer).await?;
                    self.record(
                        "fill",
                        "select",
                        &ref_id,
                        &format!("answered \"{}\" -> \"{}\"", label, answer),
                    );
                    filled += 1;
                }
                ElementRole::Checkbox => {
                    let Some(answer) = answer_for_question(&el.label, &self.rules) else {
                        continue;
                    };
                    if answer.eq_ignore_ascii_case("yes") {
                        let ref_id = el.ref_id.clone();
                        let label = el.label.clone();
                        self.session.click(&ref_id).await?;
                        self.record("fill", "check", &ref_id, &format!("checked \"{}\"", label));
                        filled += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(filled)
    }

    async fn upload_resume(&mut self, snapshot: &PageSnapshot) -> Result<bool, ApplyError> {
        if self.resume_file.is_empty() {
            self.record("upload", "no_file", "", "no resume file configured");
            return Ok(false);
        }
        let input = snapshot
            .elements
            .iter()
            .filter(|e| e.role == ElementRole::FileInput)
            .find(|e| {
                let label = e.label.to_lowercase();
                label.contains("resume") || label.contains("cv")
            })
            .or_else(|| snapshot.elements.iter().find(|e| e.role == ElementRole::FileInput));
        let Some(input) = input else {
            self.record("upload", "no_input", "", "no file upload input found");
            return Ok(false);
        };
        let ref_id = input.ref_id.clone();
        self.session.upload(&ref_id, self.resume_file).await?;
        self.record("upload", "resume", &ref_id, self.resume_file);
        Ok(true)
    }

    async fn fill_cover_letter(&mut self, snapshot: &PageSnapshot) -> Result<(), ApplyError> {
        if self.cover_letter.is_empty() {
            return Ok(());
        }
        let Some(el) = snapshot.find_labeled(
            &[ElementRole::TextArea],
            &["cover letter", "cover", "why", "additional", "message", "comment"],
        ) else {
            return Ok(());
        };
        if !el.value.is_empty() {
            return Ok(());
        }
        let ref_id = el.ref_id.clone();
        self.session.type_text(&ref_id, self.cover_letter).await?;
        self.record("fill", "cover_letter", &ref_id, "filled cover letter");
        Ok(())
    }

    async fn click_submit(&mut self) -> Result<(), ApplyError> {
        let snapshot = self.session.snapshot().await?;
        let Some(el) = snapshot.find_labeled(&[ElementRole::Button], SUBMIT_LABELS) else {
            self.record("submit", "not_found", "", "no submit button found");
            return Err(ApplyError::NoSubmitControl);
        };
        let ref_id = el.ref_id.clone();
        let label = el.label.clone();
        self.record("submit", "click", &ref_id, &label);
        self.session.click(&ref_id).await?;
        self.settle().await;
        Ok(())
    }

    /// Required selection/text fields that are still empty after a submit.
    fn missing_required(snapshot: &PageSnapshot) -> Vec<PageElement> {
        snapshot
            .elements
            .iter()
            .filter(|e| {
                e.required
                    && e.value.is_empty()
                    && matches!(e.role, ElementRole::Select | ElementRole::TextInput)
                    && !is_demographic_question(&e.label)
            })
            .cloned()
            .collect()
    }

    fn has_validation_errors(snapshot: &PageSnapshot) -> bool {
        let text = snapshot.text.to_lowercase();
        text.contains("is required") || text.contains("required field") || text.contains("please fill")
    }

    async fn submit_and_verify(&mut self, vendor: AtsVendor) -> Result<ApplyOutcome, ApplyError> {
        let method = vendor.as_str().to_string();

        for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
            self.click_submit().await?;
            let after = self.session.snapshot().await?;
            let page_lower = after.text.to_lowercase();

            if SUCCESS_PHRASES.iter().any(|p| page_lower.contains(p)) {
                self.record("verify", "confirmed", "", "success phrase found on page");
                return Ok(ApplyOutcome { method, pending_verification: false, note: None });
            }

            if CODE_CHALLENGE_PHRASES.iter().any(|p| page_lower.contains(p)) {
                self.record("verify", "code_challenge", "", "page asks for an emailed code");
                return Ok(ApplyOutcome {
                    method,
                    pending_verification: true,
                    note: Some("submission requires an emailed verification code".to_string()),
                });
            }

            let missing = Self::missing_required(&after);
            let has_errors = Self::has_validation_errors(&after) || !missing.is_empty();
            if !has_errors {
                // No confirmation text but no errors either: the form went
                // through, record it as submitted.
                self.record("verify", "submitted", "", "no errors detected after submit");
                return Ok(ApplyOutcome {
                    method,
                    pending_verification: false,
                    note: Some("submitted without explicit confirmation page".to_string()),
                });
            }

            if attempt == MAX_SUBMIT_ATTEMPTS {
                let labels: Vec<String> =
                    missing.iter().map(|e| e.label.clone()).filter(|l| !l.is_empty()).collect();
                let detail = if labels.is_empty() {
                    "unidentified required fields".to_string()
                } else {
                    labels.join(", ")
                };
                self.record("verify", "validation_failed", "", &detail);
                return Err(ApplyError::ValidationRetryExhausted(detail));
            }

            // One repair pass: fill the still-empty required fields with a
            // default choice and resubmit.
            self.record(
                "verify",
                "repair",
                "",
                &format!("{} required fields empty, repairing", missing.len()),
            );
            for el in &missing {
                let ref_id = el.ref_id.clone();
                let label = el.label.clone();
                match el.role {
                    ElementRole::Select => {
                        let answer = answer_for_question(&el.label, &self.rules)
                            .unwrap_or(DEFAULT_SELECT_ANSWER)
                            .to_string();
                        self.session.click(&ref_id).await?;
                        self.session.type_text(&ref_id, &answer).await?;
                        self.record("repair", "select", &ref_id, &format!("\"{}\" -> \"{}\"", label, answer));
                    }
                    ElementRole::TextInput => {
                        let value = map_field_to_profile(&el.label, self.profile)
                            .filter(|v| !v.is_empty())
                            .unwrap_or_else(|| "N/A".to_string());
                        self.session.type_text(&ref_id, &value).await?;
                        self.record("repair", "type", &ref_id, &format!("filled \"{}\"", label));
                    }
                    _ => {}
                }
            }
            self.settle().await;
        }

        // Unreachable: the loop either returns or errors on its last pass.
        Err(ApplyError::NoSubmitControl)
    }
}

fn is_external_destination(href: &str) -> bool {
    href.starts_with("http") && job_board_name(href).is_none()
}

/// Map a form-field label to profile data. Ordered: specific name parts
/// before the bare "name" label, which would otherwise shadow them.
pub fn map_field_to_profile(label: &str, profile: &CandidateProfile) -> Option<String> {
    let label = label.to_lowercase();
    let contains_any =
        |needles: &[&str]| needles.iter().any(|n| label.contains(n));

    if contains_any(&["first name", "given name", "firstname", "first_name", "fname"]) {
        return Some(profile.first_name().to_string());
    }
    if contains_any(&["last name", "family name", "surname", "lastname", "last_name", "lname"]) {
        return Some(profile.last_name().to_string());
    }
    if contains_any(&["full name", "your name", "fullname"]) || label.trim() == "name" {
        return Some(profile.name.clone());
    }
    if contains_any(&["email", "e-mail"]) {
        return Some(profile.email.clone());
    }
    if contains_any(&["phone", "mobile", "telephone"]) {
        return Some(profile.phone.clone());
    }
    if contains_any(&["city", "location", "address"]) {
        return Some(profile.location.clone());
    }
    if label.contains("linkedin") {
        return Some(profile.links.linkedin.clone());
    }
    if label.contains("github") {
        return Some(profile.links.github.clone());
    }
    if contains_any(&["website", "portfolio"]) {
        let website = &profile.links.website;
        return Some(if website.is_empty() { profile.links.github.clone() } else { website.clone() });
    }
    if contains_any(&["current title", "job title", "position", "current role"]) {
        return Some(profile.current_title().to_string());
    }
    if contains_any(&["current company", "employer", "company name", "organization"]) {
        return Some(profile.current_company().to_string());
    }
    if contains_any(&["school", "university", "college"]) {
        return Some(profile.education.first().map(|e| e.school.clone()).unwrap_or_default());
    }
    if label.contains("degree") {
        return Some(profile.education.first().map(|e| e.degree.clone()).unwrap_or_default());
    }
    // Salary expectations are never auto-filled.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_ats_table() {
        assert_eq!(detect_ats("https://boards.greenhouse.io/acme/jobs/1"), AtsVendor::Greenhouse);
        assert_eq!(detect_ats("https://grnh.se/abc123"), AtsVendor::Greenhouse);
        assert_eq!(detect_ats("https://jobs.lever.co/acme/uuid"), AtsVendor::Lever);
        assert_eq!(
            detect_ats("https://acme.wd5.myworkdayjobs.com/en-US/careers/job/1"),
            AtsVendor::Workday
        );
        assert_eq!(detect_ats("https://jobs.ashbyhq.com/acme/1"), AtsVendor::Ashby);
        assert_eq!(detect_ats("https://jobs.smartrecruiters.com/Acme/1"), AtsVendor::SmartRecruiters);
        assert_eq!(detect_ats("https://acme.bamboohr.com/careers/1"), AtsVendor::BambooHr);
        assert_eq!(detect_ats("https://careers-acme.icims.com/jobs/1"), AtsVendor::Icims);
        assert_eq!(detect_ats("https://jobs.jobvite.com/acme/job/1"), AtsVendor::Jobvite);
        assert_eq!(detect_ats("https://acme.recruitee.com/o/dev"), AtsVendor::Recruitee);
        assert_eq!(detect_ats("https://acme.breezy.hr/p/dev"), AtsVendor::Breezy);
        assert_eq!(detect_ats("https://acme.applytojob.com/apply/1"), AtsVendor::ApplyToJob);
        assert_eq!(detect_ats("https://app.dover.com/apply/acme/1"), AtsVendor::Dover);
        assert_eq!(detect_ats("https://ats.rippling.com/acme/jobs/1"), AtsVendor::Rippling);
        // Unrecognized domains fall back to the generic handler.
        assert_eq!(detect_ats("https://careers.acme.example/jobs/1"), AtsVendor::Generic);
    }

    #[test]
    fn test_job_board_detection() {
        assert_eq!(job_board_name("https://www.linkedin.com/jobs/view/1"), Some("LinkedIn"));
        assert_eq!(job_board_name("https://remoteok.io/remote-jobs/1"), Some("RemoteOK"));
        assert_eq!(job_board_name("https://careers.acme.example/1"), None);
    }

    #[test]
    fn test_screening_order_sponsorship_before_country() {
        let rules = default_screening_rules();
        // The sponsorship question mentions "country" too; the specific
        // sponsorship pattern must win.
        assert_eq!(
            answer_for_question("Do you require visa sponsorship to work in this country?", &rules),
            Some("No")
        );
        assert_eq!(
            answer_for_question("What country are you authorized to work in?", &rules),
            Some("Canada")
        );
        assert_eq!(
            answer_for_question("Are you authorized to work in Canada?", &rules),
            Some("Yes")
        );
        assert_eq!(
            answer_for_question("What is your country of residence?", &rules),
            Some("Canada")
        );
        assert_eq!(answer_for_question("Are you open to relocation?", &rules), Some("Yes"));
        assert_eq!(answer_for_question("How did you hear about us?", &rules), Some("Job board"));
        assert_eq!(answer_for_question("Favourite colour?", &rules), None);
    }

    #[test]
    fn test_screening_regex_pattern() {
        let rules = default_screening_rules();
        assert_eq!(
            answer_for_question("Will you now or in the future require a visa?", &rules),
            Some("No")
        );
    }

    #[test]
    fn test_overrides_win_over_defaults() {
        let overrides = vec![ScreeningOverride {
            pattern: "relocation".to_string(),
            answer: "No".to_string(),
        }];
        let mut rules = overrides.clone();
        rules.extend(default_screening_rules());
        assert_eq!(answer_for_question("Are you open to relocation?", &rules), Some("No"));
    }

    #[test]
    fn test_demographic_questions_skipped() {
        assert!(is_demographic_question("Gender identity"));
        assert!(is_demographic_question("Are you a protected veteran?"));
        assert!(is_demographic_question("Disability status"));
        assert!(is_demographic_question("Preferred pronouns"));
        assert!(!is_demographic_question("Country of residence"));
    }

    #[test]
    fn test_map_field_to_profile_ordering() {
        let profile = CandidateProfile {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "555-0100".to_string(),
            location: "Toronto, Ontario".to_string(),
            links: crate::models::ProfileLinks {
                github: "https://github.com/ada".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(map_field_to_profile("First Name *", &profile).as_deref(), Some("Ada"));
        assert_eq!(map_field_to_profile("Last name", &profile).as_deref(), Some("Lovelace"));
        assert_eq!(map_field_to_profile("Full Name", &profile).as_deref(), Some("Ada Lovelace"));
        assert_eq!(map_field_to_profile("Email address", &profile).as_deref(), Some("ada@example.com"));
        assert_eq!(map_field_to_profile("City", &profile).as_deref(), Some("Toronto, Ontario"));
        // Website falls back to the GitHub link when no website is set.
        assert_eq!(
            map_field_to_profile("Personal website", &profile).as_deref(),
            Some("https://github.com/ada")
        );
        assert_eq!(map_field_to_profile("Expected salary", &profile), None);
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;
    use crate::models::ProfileLinks;
    use crate::testutil::{
        button, element, file_input, link, required_select, text_input, FakePage, FakeSession,
    };

    fn profile() -> CandidateProfile {
        CandidateProfile {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "555-0100".to_string(),
            location: "Toronto, Ontario".to_string(),
            links: ProfileLinks {
                github: "https://github.com/ada".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn form_elements() -> Vec<crate::browser::PageElement> {
        vec![
            text_input("first", "First Name"),
            text_input("last", "Last Name"),
            text_input("email", "Email"),
            required_select("visa", "Do you require visa sponsorship?"),
            required_select("country", "What country are you authorized to work in?"),
            file_input("resume", "Resume/CV"),
            element("cover", ElementRole::TextArea, "Cover Letter"),
            button("submit", "Submit Application"),
        ]
    }

    fn thank_you(url: &str) -> FakePage {
        FakePage::new(url, "Thank you for applying to Acme!", vec![])
    }

    #[tokio::test]
    async fn test_full_greenhouse_flow() {
        let url = "https://boards.greenhouse.io/acme/jobs/1";
        let mut session = FakeSession::new()
            .page(FakePage::new(url, "Apply for this role", form_elements()))
            .on_click_swap("submit", thank_you(url));

        let p = profile();
        let mut engine = ApplyEngine::new(&mut session, &p, "Dear team,", "/tmp/resume.pdf", &[])
            .with_jitter(1, 2);
        let outcome = engine.run(url).await.unwrap();

        assert_eq!(outcome.method, "greenhouse");
        assert!(!outcome.pending_verification);
        assert!(session.actions.iter().any(|a| a == "type:first=Ada"));
        assert!(session.actions.iter().any(|a| a == "type:last=Lovelace"));
        assert!(session.actions.iter().any(|a| a == "type:email=ada@example.com"));
        assert!(session.actions.iter().any(|a| a == "type:visa=No"));
        assert!(session.actions.iter().any(|a| a == "type:country=Canada"));
        assert!(session.actions.iter().any(|a| a == "upload:resume=/tmp/resume.pdf"));
        assert!(session.actions.iter().any(|a| a == "type:cover=Dear team,"));
        assert!(session.actions.iter().any(|a| a == "click:submit"));
    }

    #[tokio::test]
    async fn test_repair_pass_fills_missed_required_select() {
        let url = "https://careers.acme.example/jobs/2";
        // The "Team size preference" dropdown matches no screening rule, so
        // the first pass leaves it empty and the submit bounces.
        let elements = vec![
            text_input("first", "First Name"),
            text_input("email", "Email"),
            required_select("teamsize", "Team size preference"),
            button("submit", "Submit Application"),
        ];
        let form = FakePage::new(url, "Apply here", elements.clone());
        let error_page = FakePage::new(url, "Team size preference is required", elements);

        let mut session = FakeSession::new()
            .page(form)
            .on_click_swap("submit", error_page)
            .on_click_swap("submit", thank_you(url));

        let p = profile();
        let mut engine =
            ApplyEngine::new(&mut session, &p, "", "", &[]).with_jitter(1, 2);
        let outcome = engine.run(url).await.unwrap();

        assert_eq!(outcome.method, "generic");
        // Repair filled the dropdown with the default choice and resubmitted.
        assert!(engine.log().iter().any(|s| s.action == "repair"
            || (s.step == "verify" && s.action == "repair")));
        assert!(session.actions.iter().any(|a| a == "type:teamsize=Yes"));
        assert_eq!(session.actions.iter().filter(|a| *a == "click:submit").count(), 2);
    }

    #[tokio::test]
    async fn test_two_submit_attempts_then_validation_exhausted() {
        let url = "https://careers.acme.example/jobs/3";
        let error_page = FakePage::new(
            url,
            "Security clearance level is required",
            vec![
                text_input("first", "First Name"),
                text_input("email", "Email"),
                button("submit", "Submit Application"),
            ],
        );
        let form = FakePage::new(
            url,
            "Apply here",
            vec![
                text_input("first", "First Name"),
                text_input("email", "Email"),
                button("submit", "Submit Application"),
            ],
        );
        // Every submit lands back on the error page.
        let mut session = FakeSession::new().page(form).on_click_swap("submit", error_page);

        let p = profile();
        let mut engine =
            ApplyEngine::new(&mut session, &p, "", "", &[]).with_jitter(1, 2);
        let err = engine.run(url).await.unwrap_err();

        assert!(matches!(err, ApplyError::ValidationRetryExhausted(_)));
        // Two submit attempts maximum, never a third.
        assert_eq!(session.actions.iter().filter(|a| *a == "click:submit").count(), 2);
    }

    #[tokio::test]
    async fn test_underfilled_form_is_reported_not_submitted() {
        let url = "https://careers.acme.example/jobs/4";
        let sparse = FakePage::new(
            url,
            "Apply here",
            vec![text_input("email", "Email"), button("submit", "Submit Application")],
        );
        let mut session = FakeSession::new().page(sparse);

        let p = profile();
        let mut engine =
            ApplyEngine::new(&mut session, &p, "", "", &[]).with_jitter(1, 2);
        let err = engine.run(url).await.unwrap_err();

        assert!(matches!(err, ApplyError::UnsupportedAts(1)));
        assert!(!session.actions.iter().any(|a| a == "click:submit"));
    }

    #[tokio::test]
    async fn test_resolves_company_site_from_aggregator() {
        let board_url = "https://www.linkedin.com/jobs/view/999";
        let career_url = "https://boards.greenhouse.io/acme/jobs/9";
        let board_page = FakePage::new(
            board_url,
            "Junior Developer at Acme",
            vec![link("ext", "Apply on company site", career_url)],
        );
        let mut session = FakeSession::new()
            .page(board_page)
            .page(FakePage::new(career_url, "Apply for this role", form_elements()))
            .on_click_swap("submit", thank_you(career_url));

        let p = profile();
        let mut engine = ApplyEngine::new(&mut session, &p, "", "/tmp/resume.pdf", &[])
            .with_jitter(1, 2);
        let outcome = engine.run(board_url).await.unwrap();

        assert_eq!(outcome.method, "greenhouse");
        assert!(session.actions.iter().any(|a| *a == format!("navigate:{}", career_url)));
    }

    #[tokio::test]
    async fn test_lever_clicks_apply_before_filling() {
        let url = "https://jobs.lever.co/acme/1234";
        let posting = FakePage::new(
            url,
            "Acme is hiring a Junior Developer",
            vec![link("open", "Apply for this job", "")],
        );
        let form = FakePage::new(url, "Submit your application", form_elements());
        let mut session = FakeSession::new()
            .page(posting)
            .on_click_swap("open", form)
            .on_click_swap("submit", thank_you(url));

        let p = profile();
        let mut engine = ApplyEngine::new(&mut session, &p, "", "/tmp/resume.pdf", &[])
            .with_jitter(1, 2);
        let outcome = engine.run(url).await.unwrap();

        assert_eq!(outcome.method, "lever");
        let open_pos = session.actions.iter().position(|a| a == "click:open").unwrap();
        let fill_pos = session.actions.iter().position(|a| a == "type:first=Ada").unwrap();
        assert!(open_pos < fill_pos);
    }
}
