use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mailparse::MailHeaderMap;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::browser::{ElementRole, PageSession, settle_delay};
use crate::config::{expand_home, MailboxConfig};
use crate::models::AutomationStep;

/// Bounded poll: 24 attempts x 5 seconds, roughly two minutes.
pub const POLL_ATTEMPTS: u32 = 24;
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MailSummary {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub snippet: String,
}

/// Read-only mailbox query interface. The resolver only searches and reads;
/// it never sends mail.
#[async_trait]
pub trait MailboxSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<MailSummary>>;
    async fn body(&self, id: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// IMAP implementation
// ---------------------------------------------------------------------------

/// IMAP-over-TLS mailbox. Connects per call; the imap client is blocking, so
/// calls run on the blocking pool.
pub struct ImapMailbox {
    server: String,
    port: u16,
    username: String,
    password: String,
}

impl ImapMailbox {
    pub fn from_config(config: &MailboxConfig) -> Result<Self> {
        if config.server.is_empty() || config.username.is_empty() {
            return Err(anyhow!("mailbox server/username not configured"));
        }
        let password_path = expand_home(&config.password_file);
        let password = std::fs::read_to_string(&password_path)
            .with_context(|| format!("Failed to read password file: {}", password_path.display()))?
            .trim()
            .to_string();
        Ok(Self {
            server: config.server.clone(),
            port: config.port.unwrap_or(993),
            username: config.username.clone(),
            password,
        })
    }

    fn connect(&self) -> Result<imap::Session<native_tls::TlsStream<std::net::TcpStream>>> {
        let tls = native_tls::TlsConnector::builder().build()?;
        let tcp = std::net::TcpStream::connect((self.server.as_str(), self.port))
            .context("Failed to connect to IMAP server")?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;
        tcp.set_write_timeout(Some(Duration::from_secs(30)))?;
        let tls_stream = tls.connect(&self.server, tcp)?;
        let client = imap::Client::new(tls_stream);
        let mut session = client
            .login(&self.username, &self.password)
            .map_err(|e| anyhow!("IMAP login failed: {}", e.0))?;
        session.select("INBOX")?;
        Ok(session)
    }

    fn clone_for_task(&self) -> Self {
        Self {
            server: self.server.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[async_trait]
impl MailboxSearch for ImapMailbox {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<MailSummary>> {
        let mailbox = self.clone_for_task();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || {
            let mut session = mailbox.connect()?;
            let ids = session.search(&query)?;
            let mut ids: Vec<u32> = ids.into_iter().collect();
            ids.sort_unstable_by(|a, b| b.cmp(a)); // newest first

            let mut summaries = Vec::new();
            for id in ids.into_iter().take(max_results) {
                let messages = session.fetch(id.to_string(), "RFC822")?;
                for message in messages.iter() {
                    let Some(raw) = message.body() else { continue };
                    let Ok(parsed) = mailparse::parse_mail(raw) else { continue };
                    summaries.push(MailSummary {
                        id: id.to_string(),
                        subject: parsed.headers.get_first_value("Subject").unwrap_or_default(),
                        from: parsed.headers.get_first_value("From").unwrap_or_default(),
                        date: parsed.headers.get_first_value("Date").unwrap_or_default(),
                        snippet: String::new(),
                    });
                }
            }
            session.logout().ok();
            Ok(summaries)
        })
        .await
        .context("mailbox search task failed")?
    }

    async fn body(&self, id: &str) -> Result<String> {
        let mailbox = self.clone_for_task();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut session = mailbox.connect()?;
            let messages = session.fetch(&id, "RFC822")?;
            let mut body = String::new();
            for message in messages.iter() {
                if let Some(raw) = message.body() {
                    let parsed = mailparse::parse_mail(raw)?;
                    body = plain_text_body(&parsed)?;
                    break;
                }
            }
            session.logout().ok();
            Ok(body)
        })
        .await
        .context("mailbox fetch task failed")?
    }
}

/// Prefer the text/plain part; verification codes are plain text.
fn plain_text_body(parsed: &mailparse::ParsedMail) -> Result<String> {
    if parsed.subparts.is_empty() {
        return Ok(parsed.get_body()?);
    }
    for part in &parsed.subparts {
        let content_type = part.headers.get_first_value("Content-Type").unwrap_or_default();
        if content_type.contains("text/plain") {
            return Ok(part.get_body()?);
        }
    }
    if let Some(part) = parsed.subparts.first() {
        return Ok(part.get_body()?);
    }
    Err(anyhow!("No message body found"))
}

// ---------------------------------------------------------------------------
// Code extraction
// ---------------------------------------------------------------------------

/// Ordered label patterns; the bare 8-char line format some vendors use
/// comes last as the least specific.
const CODE_PATTERNS: &[&str] = &[
    r"(?i)security\s*code[:\s]+([A-Za-z0-9]{6,10})",
    r"(?i)verification\s*code[:\s]+([A-Za-z0-9]{6,10})",
    r"(?i)paste\s+this\s+code[:\s]+([A-Za-z0-9]{6,10})",
    r"(?i)\bcode[:\s]+([A-Za-z0-9]{6,10})",
    r"(?i)\bis[:\s]+([A-Za-z0-9]{6,10})",
    r"\n\s*([A-Za-z0-9]{8})\s*\n",
];

/// Extract a 6-10 character alphanumeric verification token.
pub fn extract_verification_code(body: &str) -> Option<String> {
    for pattern in CODE_PATTERNS {
        let Ok(re) = Regex::new(pattern) else { continue };
        if let Some(caps) = re.captures(body) {
            let code = caps.get(1)?.as_str().trim().to_string();
            if (6..=10).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Some(code);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Code entered and the page confirmed the application.
    Verified,
    /// Code entered but the page gave no confirmation.
    CodeEntered,
    /// No code arrived before the deadline. The submission itself still
    /// stands; callers must treat this as a soft success.
    TimedOut,
}

pub struct CodeResolver<'a> {
    mailbox: &'a dyn MailboxSearch,
    pub attempts: u32,
    pub interval: Duration,
    /// Sender domain the challenge mail comes from.
    pub sender_domain: String,
    /// Only consider messages newer than this.
    pub max_age: chrono::Duration,
    jitter: (u64, u64),
}

impl<'a> CodeResolver<'a> {
    pub fn new(mailbox: &'a dyn MailboxSearch) -> Self {
        Self {
            mailbox,
            attempts: POLL_ATTEMPTS,
            interval: POLL_INTERVAL,
            sender_domain: "greenhouse.io".to_string(),
            max_age: chrono::Duration::minutes(3),
            jitter: (1000, 2500),
        }
    }

    #[cfg(test)]
    pub fn fast(mailbox: &'a dyn MailboxSearch, attempts: u32) -> Self {
        let mut resolver = Self::new(mailbox);
        resolver.attempts = attempts;
        resolver.interval = Duration::from_millis(5);
        resolver.jitter = (1, 2);
        resolver
    }

    /// Poll the mailbox until a code arrives or the deadline passes, then
    /// complete the challenge on the page. Never fails the application: every
    /// path returns an outcome, and the hard deadline guarantees termination
    /// even when no matching mail ever arrives.
    pub async fn resolve(
        &self,
        session: &mut dyn PageSession,
        log: &mut Vec<AutomationStep>,
    ) -> VerificationOutcome {
        record(log, "security_code", "waiting", "polling mailbox for verification code");

        for attempt in 1..=self.attempts {
            if let Some(code) = self.poll_once().await {
                record(
                    log,
                    "security_code",
                    "found",
                    &format!("got code {}****", &code[..2.min(code.len())]),
                );
                return self.enter_code(session, &code, log).await;
            }
            record(
                log,
                "security_code",
                "polling",
                &format!("attempt {}/{} - no code yet", attempt, self.attempts),
            );
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        record(log, "security_code", "timeout", "verification code not received before deadline");
        VerificationOutcome::TimedOut
    }

    async fn poll_once(&self) -> Option<String> {
        let since = (Utc::now() - self.max_age).format("%d-%b-%Y").to_string();
        let query = format!("FROM \"{}\" SUBJECT \"code\" SINCE {}", self.sender_domain, since);
        let messages = match self.mailbox.search(&query, 5).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "mailbox search failed, will retry");
                return None;
            }
        };

        for message in messages {
            if !self.recent_enough(&message.date) {
                continue;
            }
            debug!(subject = %message.subject, from = %message.from, "candidate verification mail");
            if let Some(code) = extract_verification_code(&message.snippet) {
                return Some(code);
            }
            match self.mailbox.body(&message.id).await {
                Ok(body) => {
                    if let Some(code) = extract_verification_code(&body) {
                        return Some(code);
                    }
                }
                Err(e) => warn!(error = %e, id = message.id, "could not fetch message body"),
            }
        }
        None
    }

    /// SINCE is day-granular on the search side; the age window is enforced
    /// here. Unparseable dates are accepted rather than dropped.
    fn recent_enough(&self, date: &str) -> bool {
        match chrono::DateTime::parse_from_rfc2822(date.trim()) {
            Ok(parsed) => Utc::now().signed_duration_since(parsed) <= self.max_age,
            Err(_) => true,
        }
    }

    async fn enter_code(
        &self,
        session: &mut dyn PageSession,
        code: &str,
        log: &mut Vec<AutomationStep>,
    ) -> VerificationOutcome {
        let snapshot = match session.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                record(log, "security_code", "error", &format!("snapshot failed: {}", e));
                return VerificationOutcome::CodeEntered;
            }
        };

        // First field resembling a code input, else the first empty text box.
        let input = snapshot
            .find_labeled(
                &[ElementRole::TextInput],
                &["security code", "verification code", "code"],
            )
            .or_else(|| {
                snapshot
                    .elements
                    .iter()
                    .find(|e| e.role == ElementRole::TextInput && e.value.is_empty())
            });
        let Some(input) = input else {
            record(log, "security_code", "no_input", "no code input field found");
            return VerificationOutcome::CodeEntered;
        };
        let input_ref = input.ref_id.clone();
        if let Err(e) = session.type_text(&input_ref, code).await {
            record(log, "security_code", "error", &format!("typing code failed: {}", e));
            return VerificationOutcome::CodeEntered;
        }
        record(log, "security_code", "filled", &format!("entered code into {}", input_ref));

        // Nearest verify/submit control.
        if let Some(btn) = snapshot
            .find_labeled(&[ElementRole::Button], &["verify", "submit", "continue"])
            .map(|b| b.ref_id.clone())
        {
            if session.click(&btn).await.is_ok() {
                record(log, "security_code", "submitted", "clicked verify control");
                settle_delay(self.jitter.0, self.jitter.1).await;
                if let Ok(after) = session.snapshot().await {
                    let text = after.text.to_lowercase();
                    if ["thank", "received", "submitted", "success"]
                        .iter()
                        .any(|p| text.contains(p))
                    {
                        record(log, "security_code", "verified", "application confirmed");
                        return VerificationOutcome::Verified;
                    }
                }
            }
        }

        VerificationOutcome::CodeEntered
    }
}

fn record(log: &mut Vec<AutomationStep>, step: &str, action: &str, result: &str) {
    info!(step, action, result, "verify");
    log.push(AutomationStep {
        step: step.to_string(),
        action: action.to_string(),
        element_ref: String::new(),
        result: result.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{button, text_input, FakePage, FakeSession};
    use std::time::Instant;

    #[test]
    fn test_extract_code_labeled_patterns() {
        assert_eq!(
            extract_verification_code("Your security code: ABC123XY").as_deref(),
            Some("ABC123XY")
        );
        assert_eq!(
            extract_verification_code("verification code is below\nVerification Code: 99ZZtt11")
                .as_deref(),
            Some("99ZZtt11")
        );
        assert_eq!(
            extract_verification_code("Copy and paste this code: qq11ww22").as_deref(),
            Some("qq11ww22")
        );
    }

    #[test]
    fn test_extract_code_standalone_line() {
        assert_eq!(
            extract_verification_code("Here is your code\n\n  hBVad3px  \n\nThanks").as_deref(),
            Some("hBVad3px")
        );
    }

    #[test]
    fn test_extract_code_rejects_bad_tokens() {
        // Too short.
        assert_eq!(extract_verification_code("code: AB12"), None);
        // Nothing code-like at all.
        assert_eq!(extract_verification_code("Welcome to our newsletter!"), None);
    }

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

    struct CodeMailbox;

    #[async_trait]
    impl MailboxSearch for CodeMailbox {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<MailSummary>> {
            Ok(vec![MailSummary {
                id: "7".to_string(),
                subject: "Your security code".to_string(),
                from: "no-reply@greenhouse.io".to_string(),
                date: chrono::Utc::now().to_rfc2822(),
                snippet: String::new(),
            }])
        }
        async fn body(&self, _id: &str) -> Result<String> {
            Ok("Your security code: XK39PQ71".to_string())
        }
    }

    fn code_challenge_session() -> FakeSession {
        let challenge = FakePage::new(
            "https://boards.greenhouse.io/acme/confirm",
            "Enter the verification code we emailed you",
            vec![text_input("code_in", "Verification code"), button("verify_btn", "Verify")],
        );
        let confirmed = FakePage::new(
            "https://boards.greenhouse.io/acme/confirm",
            "Thank you - application received",
            vec![],
        );
        FakeSession::new()
            .page(challenge.clone())
            .on_click_swap("verify_btn", confirmed)
    }

    #[tokio::test]
    async fn test_resolver_times_out_within_deadline() {
        let mailbox = EmptyMailbox;
        let resolver = CodeResolver::fast(&mailbox, 3);
        let mut session = code_challenge_session();
        session
            .navigate("https://boards.greenhouse.io/acme/confirm", Duration::from_secs(1))
            .await
            .unwrap();

        let mut log = Vec::new();
        let start = Instant::now();
        let outcome = resolver.resolve(&mut session, &mut log).await;
        assert_eq!(outcome, VerificationOutcome::TimedOut);
        // Bounded wait: 3 attempts at 5ms never takes a full second.
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(log.iter().any(|s| s.action == "timeout"));
    }

    #[tokio::test]
    async fn test_resolver_enters_code_and_confirms() {
        let mailbox = CodeMailbox;
        let resolver = CodeResolver::fast(&mailbox, 3);
        let mut session = code_challenge_session();
        session
            .navigate("https://boards.greenhouse.io/acme/confirm", Duration::from_secs(1))
            .await
            .unwrap();

        let mut log = Vec::new();
        let outcome = resolver.resolve(&mut session, &mut log).await;
        assert_eq!(outcome, VerificationOutcome::Verified);
        assert!(session.actions.iter().any(|a| a == "type:code_in=XK39PQ71"));
        assert!(session.actions.iter().any(|a| a == "click:verify_btn"));
    }
}
