use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SourcesConfig;
use crate::models::{NormalizedJob, Preferences};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const CACHE_TTL: Duration = Duration::from_secs(600);
const MAX_HN_COMMENTS: usize = 200;
/// Hiring-thread fragments shorter than this are navigation noise, not posts.
const MIN_FRAGMENT_LEN: usize = 20;
/// Concurrent fetches across the whole discovery run.
pub const DISCOVERY_PARALLELISM: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("unexpected payload: {0}")]
    Parse(String),
    #[error("source not configured: {0}")]
    NotConfigured(&'static str),
    #[error("unknown source: {0}")]
    Unknown(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Http(e.to_string())
    }
}

pub fn http_client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SourceError::Http(e.to_string()))
}

/// Read-through cache for bulk source fetches, shared across the keyword
/// loop of a single discovery run. Entries expire after 10 minutes so a
/// long-lived process never serves stale dumps.
#[derive(Default)]
pub struct SourceCache {
    remoteok: Mutex<Option<(Instant, Vec<serde_json::Value>)>>,
    hn_comments: Mutex<Option<(Instant, Vec<HnComment>)>>,
}

/// Minimum spacing between calls to the same host, owned by the orchestrator
/// and passed to the aggregator explicitly.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: Mutex::new(HashMap::new()) }
    }

    pub async fn wait(&self, key: &str) {
        let sleep_for = {
            let mut last = self.last.lock().await;
            let now = Instant::now();
            let wait = match last.get(key) {
                Some(prev) => self.min_interval.saturating_sub(now.duration_since(*prev)),
                None => Duration::ZERO,
            };
            last.insert(key.to_string(), now + wait);
            wait
        };
        if !sleep_for.is_zero() {
            tokio::time::sleep(sleep_for).await;
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteOK: bulk JSON API
// ---------------------------------------------------------------------------

async fn fetch_remoteok_dump(
    client: &reqwest::Client,
    cache: &SourceCache,
) -> Result<Vec<serde_json::Value>, SourceError> {
    let mut guard = cache.remoteok.lock().await;
    if let Some((fetched_at, jobs)) = guard.as_ref() {
        if fetched_at.elapsed() < CACHE_TTL {
            debug!(count = jobs.len(), "remoteok: using cached dump");
            return Ok(jobs.clone());
        }
    }

    let data: Vec<serde_json::Value> = client
        .get("https://remoteok.io/api")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    // First element is a legal notice, not a job.
    let jobs: Vec<serde_json::Value> = data.into_iter().skip(1).collect();
    info!(count = jobs.len(), "remoteok: fetched dump");
    *guard = Some((Instant::now(), jobs.clone()));
    Ok(jobs)
}

pub async fn search_remoteok(
    client: &reqwest::Client,
    term: &str,
    limit: usize,
    cache: &SourceCache,
) -> Result<Vec<NormalizedJob>, SourceError> {
    let raw_jobs = fetch_remoteok_dump(client, cache).await?;
    Ok(filter_remoteok(&raw_jobs, term, limit))
}

fn filter_remoteok(raw_jobs: &[serde_json::Value], term: &str, limit: usize) -> Vec<NormalizedJob> {
    let terms = search_terms(term);
    let mut jobs = Vec::new();

    for raw in raw_jobs {
        let position = str_field(raw, "position");
        let company = str_field(raw, "company");
        let description = str_field(raw, "description");
        let tags = raw
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let desc_head: String = description.chars().take(500).collect();
        let searchable =
            format!("{} {} {} {}", position, company, tags, desc_head).to_lowercase();
        if !terms.iter().any(|t| searchable.contains(t)) {
            continue;
        }

        let id = raw
            .get("id")
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .unwrap_or_default();
        let url = [str_field(raw, "apply_url"), str_field(raw, "url")]
            .into_iter()
            .find(|u| !u.is_empty())
            .unwrap_or_else(|| format!("https://remoteok.io/remote-jobs/{}", id));
        let location = {
            let loc = str_field(raw, "location");
            if loc.is_empty() { "Remote".to_string() } else { loc }
        };

        jobs.push(NormalizedJob {
            title: position,
            company,
            location,
            canonical_url: url,
            description: html_to_text(&description),
            salary_min: num_field(raw, "salary_min"),
            salary_max: num_field(raw, "salary_max"),
            job_type: "fulltime".to_string(),
            source_name: "remoteok".to_string(),
            external_id: id,
            posted_at: raw.get("date").and_then(|v| v.as_str()).map(str::to_string),
        });

        if jobs.len() >= limit {
            break;
        }
    }

    jobs
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

fn num_field(value: &serde_json::Value, key: &str) -> Option<i64> {
    let v = value.get(key)?;
    if let Some(n) = v.as_i64() {
        return (n > 0).then_some(n);
    }
    if let Some(f) = v.as_f64() {
        return (f > 0.0).then_some(f as i64);
    }
    v.as_str().and_then(|s| s.replace([',', '$'], "").parse().ok())
}

// ---------------------------------------------------------------------------
// Hacker News "Who is hiring"
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Deserialize)]
struct HnComment {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    dead: bool,
}

async fn fetch_hn_comments(
    client: &reqwest::Client,
    cache: &SourceCache,
) -> Result<Vec<HnComment>, SourceError> {
    let mut guard = cache.hn_comments.lock().await;
    if let Some((fetched_at, comments)) = guard.as_ref() {
        if fetched_at.elapsed() < CACHE_TTL {
            debug!(count = comments.len(), "hn: using cached comments");
            return Ok(comments.clone());
        }
    }

    // Locate the latest monthly thread via Algolia.
    let search: serde_json::Value = client
        .get("https://hn.algolia.com/api/v1/search")
        .query(&[
            ("query", "\"Ask HN: Who is hiring\""),
            ("tags", "story"),
            ("hitsPerPage", "5"),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let mut hits: Vec<&serde_json::Value> = search
        .get("hits")
        .and_then(|h| h.as_array())
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    hits.sort_by_key(|h| std::cmp::Reverse(h.get("created_at_i").and_then(|v| v.as_i64()).unwrap_or(0)));
    let thread_id = hits
        .first()
        .and_then(|h| h.get("objectID"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| SourceError::Parse("no Who is Hiring thread found".to_string()))?
        .to_string();
    info!(thread_id = %thread_id, "hn: found hiring thread");

    let thread: serde_json::Value = client
        .get(format!("https://hacker-news.firebaseio.com/v0/item/{}.json", thread_id))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let comment_ids: Vec<i64> = thread
        .get("kids")
        .and_then(|k| k.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default();
    if comment_ids.is_empty() {
        return Err(SourceError::Parse("hiring thread has no comments".to_string()));
    }

    // Top-level comments fetched concurrently, bounded.
    let semaphore = Arc::new(Semaphore::new(DISCOVERY_PARALLELISM));
    let mut set = JoinSet::new();
    for cid in comment_ids.into_iter().take(MAX_HN_COMMENTS) {
        let client = client.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let url = format!("https://hacker-news.firebaseio.com/v0/item/{}.json", cid);
            let resp = client.get(url).send().await.ok()?;
            resp.json::<HnComment>().await.ok()
        });
    }

    let mut comments = Vec::new();
    while let Some(joined) = set.join_next().await {
        if let Ok(Some(comment)) = joined {
            if !comment.deleted && !comment.dead {
                comments.push(comment);
            }
        }
    }
    info!(count = comments.len(), "hn: fetched comments");
    *guard = Some((Instant::now(), comments.clone()));
    Ok(comments)
}

pub async fn search_hn_hiring(
    client: &reqwest::Client,
    term: &str,
    location: &str,
    remote_ok: bool,
    limit: usize,
    cache: &SourceCache,
) -> Result<Vec<NormalizedJob>, SourceError> {
    let comments = fetch_hn_comments(client, cache).await?;
    let parsed: Vec<NormalizedJob> =
        comments.iter().filter_map(parse_hiring_comment).collect();

    let terms = search_terms(term);
    let mut filtered: Vec<NormalizedJob> = parsed
        .into_iter()
        .filter(|job| {
            let combined =
                format!("{} {} {}", job.title, job.company, job.description).to_lowercase();
            terms.iter().any(|t| combined.contains(t))
        })
        .take(limit)
        .collect();

    if !location.is_empty() {
        let loc = location.to_lowercase();
        filtered.retain(|job| {
            let job_loc = job.location.to_lowercase();
            let job_desc = job.description.to_lowercase();
            job_loc.contains(&loc)
                || job_desc.contains(&loc)
                || job_loc.contains("remote")
                || (remote_ok && job_desc.contains("remote"))
        });
    }

    Ok(filtered)
}

/// Parse one hiring-thread comment into a job.
///
/// Common format (pipe-delimited first line):
///   Company Name | City, State (Remote) | Role Title | $Xk-$Yk | https://...
///
/// Remaining parts are classified by ordered pattern matching: URL first,
/// then salary, then location hints; whatever is left is the title.
fn parse_hiring_comment(comment: &HnComment) -> Option<NormalizedJob> {
    if comment.text.is_empty() {
        return None;
    }
    let text = html_to_text(&comment.text);
    if text.len() < MIN_FRAGMENT_LEN {
        return None;
    }

    let url_re = Regex::new(r"https?://\S+").ok()?;
    let salary_re = Regex::new(r"\$[\d,]+[kK]?\s*[-\u{2013}]\s*\$?[\d,]+[kK]?").ok()?;
    let location_re =
        Regex::new(r"(?i)(remote|onsite|hybrid|NYC|SF|Toronto|Canada|USA|EU|Berlin|London)")
            .ok()?;
    let state_re = Regex::new(r"\b[A-Z]{2}\b").ok()?;

    let mut lines = text.lines();
    let first_line = lines.next().unwrap_or("");
    let parts: Vec<&str> = first_line.split('|').map(str::trim).collect();

    let mut company = String::new();
    let mut location = String::new();
    let mut title = String::new();
    let mut salary = String::new();
    let mut job_url = String::new();

    if parts.len() >= 2 {
        company = parts[0].to_string();
        for part in &parts[1..] {
            if let Some(m) = url_re.find(part) {
                job_url = m.as_str().trim_end_matches(')').to_string();
                continue;
            }
            if let Some(m) = salary_re.find(part) {
                salary = m.as_str().to_string();
                continue;
            }
            if location_re.is_match(part) || (state_re.is_match(part) && part.len() < 40) {
                location = part.to_string();
                continue;
            }
            if title.is_empty() {
                title = part.to_string();
            }
        }
    } else {
        company = first_line.chars().take(100).collect();
    }

    // URL may appear anywhere in the body, and sometimes inside the company
    // cell itself.
    if job_url.is_empty() {
        if let Some(m) = url_re.find(&text) {
            job_url = m.as_str().trim_end_matches(')').to_string();
        }
    }
    if let Some(url_in_company) = url_re.find(&company).map(|m| m.as_str().to_string()) {
        if job_url.is_empty() {
            job_url = url_in_company.trim_end_matches(')').to_string();
        }
        company = company.replace(&url_in_company, "").replace("()", "");
        company = company.trim().trim_end_matches('(').trim().to_string();
    }

    let description: String = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    let (salary_min, salary_max) =
        parse_salary_range(if salary.is_empty() { &text } else { &salary });

    if company.is_empty() || (title.is_empty() && description.is_empty()) {
        return None;
    }

    Some(NormalizedJob {
        title: if title.is_empty() { "See Description".to_string() } else { title },
        company,
        location,
        canonical_url: if job_url.is_empty() {
            format!("https://news.ycombinator.com/item?id={}", comment.id)
        } else {
            job_url
        },
        description: description.chars().take(2000).collect(),
        salary_min,
        salary_max,
        job_type: String::new(),
        source_name: "hn_hiring".to_string(),
        external_id: comment.id.to_string(),
        posted_at: None,
    })
}

/// Extract a salary range like "$120k-$180k" or "$120,000 - $180,000".
pub fn parse_salary_range(text: &str) -> (Option<i64>, Option<i64>) {
    let re = match Regex::new(
        r"\$(\d{2,3}),?(\d{3})?\s*[kK]?\s*(?:[-\u{2013}]|to)+\s*\$?(\d{2,3}),?(\d{3})?\s*[kK]?",
    ) {
        Ok(re) => re,
        Err(_) => return (None, None),
    };
    let caps = match re.captures(text) {
        Some(caps) => caps,
        None => return (None, None),
    };

    let join = |a: Option<regex::Match>, b: Option<regex::Match>| -> Option<i64> {
        let mut s = a?.as_str().to_string();
        if let Some(b) = b {
            s.push_str(b.as_str());
        }
        s.parse().ok()
    };

    let mut min = join(caps.get(1), caps.get(2));
    let mut max = join(caps.get(3), caps.get(4));
    // "$120-$180" style shorthand means thousands.
    if let Some(v) = min {
        if v < 1000 {
            min = Some(v * 1000);
        }
    }
    if let Some(v) = max {
        if v < 1000 {
            max = Some(v * 1000);
        }
    }
    (min, max)
}

// ---------------------------------------------------------------------------
// JSearch: hosted job-search API
// ---------------------------------------------------------------------------

pub async fn search_jsearch(
    client: &reqwest::Client,
    config: &SourcesConfig,
    term: &str,
    location: &str,
    limit: usize,
) -> Result<Vec<NormalizedJob>, SourceError> {
    if config.jsearch_api_key.is_empty() {
        return Err(SourceError::NotConfigured("jsearch_api_key"));
    }
    let host = if config.jsearch_host.is_empty() {
        "jsearch.p.rapidapi.com"
    } else {
        config.jsearch_host.as_str()
    };

    let query = if location.is_empty() {
        term.to_string()
    } else {
        format!("{} in {}", term, location)
    };

    let body: serde_json::Value = client
        .get(format!("https://{}/search", host))
        .header("X-RapidAPI-Key", &config.jsearch_api_key)
        .header("X-RapidAPI-Host", host)
        .query(&[("query", query.as_str()), ("page", "1"), ("num_pages", "1")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let data = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| SourceError::Parse("jsearch payload missing data array".to_string()))?;

    let mut jobs = Vec::new();
    for raw in data.iter().take(limit) {
        let url = str_field(raw, "job_apply_link");
        if url.is_empty() {
            continue;
        }
        let location = [str_field(raw, "job_city"), str_field(raw, "job_country")]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        jobs.push(NormalizedJob {
            title: str_field(raw, "job_title"),
            company: str_field(raw, "employer_name"),
            location,
            canonical_url: url,
            description: str_field(raw, "job_description").chars().take(2000).collect(),
            salary_min: num_field(raw, "job_min_salary"),
            salary_max: num_field(raw, "job_max_salary"),
            job_type: str_field(raw, "job_employment_type").to_lowercase(),
            source_name: "jsearch".to_string(),
            external_id: str_field(raw, "job_id"),
            posted_at: raw
                .get("job_posted_at_datetime_utc")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        });
    }
    Ok(jobs)
}

// ---------------------------------------------------------------------------
// We Work Remotely: HTML scraping
// ---------------------------------------------------------------------------

pub async fn search_weworkremotely(
    client: &reqwest::Client,
    term: &str,
    limit: usize,
) -> Result<Vec<NormalizedJob>, SourceError> {
    let body = client
        .get("https://weworkremotely.com/remote-jobs/search")
        .query(&[("term", term)])
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(parse_wwr_listing(&body, limit))
}

fn parse_wwr_listing(html: &str, limit: usize) -> Vec<NormalizedJob> {
    let document = scraper::Html::parse_document(html);
    let item_selector = match scraper::Selector::parse("section.jobs li") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let link_selector = scraper::Selector::parse("a[href^='/remote-jobs/']").ok();
    let title_selector = scraper::Selector::parse("span.title").ok();
    let company_selector = scraper::Selector::parse("span.company").ok();
    let region_selector = scraper::Selector::parse("span.region").ok();

    let (Some(link_selector), Some(title_selector), Some(company_selector)) =
        (link_selector, title_selector, company_selector)
    else {
        return Vec::new();
    };

    let mut jobs = Vec::new();
    for item in document.select(&item_selector) {
        let Some(link) = item.select(&link_selector).next() else { continue };
        let Some(href) = link.value().attr("href") else { continue };
        let title = item
            .select(&title_selector)
            .next()
            .map(|e| e.text().collect::<String>())
            .unwrap_or_default();
        let company = item
            .select(&company_selector)
            .next()
            .map(|e| e.text().collect::<String>())
            .unwrap_or_default();
        let region = region_selector
            .as_ref()
            .and_then(|s| item.select(s).next())
            .map(|e| e.text().collect::<String>())
            .unwrap_or_default();

        let title = title.trim().to_string();
        if title.len() < 5 || company.trim().is_empty() {
            continue; // view-all and category rows
        }

        jobs.push(NormalizedJob {
            title,
            company: company.trim().to_string(),
            location: if region.trim().is_empty() { "Remote".to_string() } else { region.trim().to_string() },
            canonical_url: format!("https://weworkremotely.com{}", href),
            description: String::new(),
            salary_min: None,
            salary_max: None,
            job_type: String::new(),
            source_name: "weworkremotely".to_string(),
            external_id: href.trim_start_matches("/remote-jobs/").to_string(),
            posted_at: None,
        });
        if jobs.len() >= limit {
            break;
        }
    }
    jobs
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

pub const KNOWN_SOURCES: &[&str] = &["remoteok", "hn_hiring", "jsearch", "weworkremotely"];

fn source_host(source: &str) -> &'static str {
    match source {
        "remoteok" => "remoteok.io",
        "hn_hiring" => "hn.algolia.com",
        "jsearch" => "jsearch.p.rapidapi.com",
        "weworkremotely" => "weworkremotely.com",
        _ => "unknown",
    }
}

pub struct AggregateOutcome {
    pub jobs: Vec<NormalizedJob>,
    /// One entry per adapter invocation that failed; never aborts the run.
    pub failures: Vec<(String, SourceError)>,
}

/// Run every enabled source for every keyword through a bounded worker pool.
/// Adapters are independent; a failing one is collected and the run goes on.
pub async fn discover_sources(
    client: &reqwest::Client,
    sources_config: &SourcesConfig,
    prefs: &Preferences,
    cache: Arc<SourceCache>,
    limiter: Arc<RateLimiter>,
    per_source_limit: usize,
) -> AggregateOutcome {
    let semaphore = Arc::new(Semaphore::new(DISCOVERY_PARALLELISM));
    let mut set: JoinSet<(String, Result<Vec<NormalizedJob>, SourceError>)> = JoinSet::new();

    for source in &prefs.enabled_sources {
        for keyword in &prefs.keywords {
            let source = source.clone();
            let keyword = keyword.clone();
            let client = client.clone();
            let config = sources_config.clone();
            let location = prefs.location.clone();
            let remote_ok = prefs.remote_ok;
            let cache = cache.clone();
            let limiter = limiter.clone();
            let semaphore = semaphore.clone();

            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (source, Err(SourceError::Http("worker pool closed".to_string())));
                };
                limiter.wait(source_host(&source)).await;
                let result = match source.as_str() {
                    "remoteok" => {
                        search_remoteok(&client, &keyword, per_source_limit, &cache).await
                    }
                    "hn_hiring" => {
                        search_hn_hiring(
                            &client,
                            &keyword,
                            &location,
                            remote_ok,
                            per_source_limit,
                            &cache,
                        )
                        .await
                    }
                    "jsearch" => {
                        search_jsearch(&client, &config, &keyword, &location, per_source_limit)
                            .await
                    }
                    "weworkremotely" => {
                        search_weworkremotely(&client, &keyword, per_source_limit).await
                    }
                    other => Err(SourceError::Unknown(other.to_string())),
                };
                (source, result)
            });
        }
    }

    let mut jobs = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((source, Ok(mut found))) => {
                debug!(source = %source, count = found.len(), "source search finished");
                jobs.append(&mut found);
            }
            Ok((source, Err(e))) => {
                warn!(source = %source, error = %e, "source search failed");
                failures.push((source, e));
            }
            Err(e) => {
                warn!(error = %e, "discovery worker panicked");
                failures.push(("worker".to_string(), SourceError::Http(e.to_string())));
            }
        }
    }

    AggregateOutcome { jobs: collapse_near_duplicates(jobs), failures }
}

/// Within one run, drop postings that are the same job seen twice: identical
/// canonical URL, or near-identical title at the same company.
fn collapse_near_duplicates(jobs: Vec<NormalizedJob>) -> Vec<NormalizedJob> {
    let mut kept: Vec<NormalizedJob> = Vec::new();
    let mut seen_urls: std::collections::HashSet<String> = std::collections::HashSet::new();

    for job in jobs {
        let url = crate::scoring::canonical_url(&job.canonical_url);
        if !seen_urls.insert(url) {
            continue;
        }
        let duplicate = kept.iter().any(|k| {
            k.company.eq_ignore_ascii_case(&job.company)
                && strsim::jaro_winkler(&k.title.to_lowercase(), &job.title.to_lowercase()) >= 0.92
        });
        if !duplicate {
            kept.push(job);
        }
    }
    kept
}

fn search_terms(term: &str) -> Vec<String> {
    term.to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Flatten an HTML fragment to text, one text node per line.
fn html_to_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let fragment = scraper::Html::parse_fragment(html);
    let mut out = String::new();
    for node in fragment.root_element().text() {
        let trimmed = node.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(text: &str) -> HnComment {
        HnComment { id: 12345, text: text.to_string(), deleted: false, dead: false }
    }

    #[test]
    fn test_parse_hiring_comment_pipe_format() {
        let c = comment(
            "Acme Robotics | Toronto, ON (Remote) | Junior Backend Developer | \
             $90k-$120k | https://acme.example/careers<p>We build robots. \
             Django and React stack, small team, lots of mentorship.",
        );
        let job = parse_hiring_comment(&c).unwrap();
        assert_eq!(job.company, "Acme Robotics");
        assert_eq!(job.title, "Junior Backend Developer");
        assert_eq!(job.location, "Toronto, ON (Remote)");
        assert_eq!(job.canonical_url, "https://acme.example/careers");
        assert_eq!(job.salary_min, Some(90_000));
        assert_eq!(job.salary_max, Some(120_000));
        assert!(job.description.contains("Django"));
    }

    #[test]
    fn test_parse_hiring_comment_rejects_noise() {
        assert!(parse_hiring_comment(&comment("too short")).is_none());
        assert!(parse_hiring_comment(&comment("")).is_none());
    }

    #[test]
    fn test_parse_hiring_comment_url_fallback() {
        // No pipe-delimited URL cell: the body URL is used; no URL at all
        // falls back to the thread item link.
        let c = comment(
            "SoloCo | Berlin | Platform Engineer<p>Apply at https://solo.example/jobs today",
        );
        let job = parse_hiring_comment(&c).unwrap();
        assert_eq!(job.canonical_url, "https://solo.example/jobs");

        let c2 = comment("NoLinkCo | London | Data Engineer<p>Email us to apply, good pay");
        let job2 = parse_hiring_comment(&c2).unwrap();
        assert_eq!(job2.canonical_url, "https://news.ycombinator.com/item?id=12345");
    }

    #[test]
    fn test_parse_salary_range_variants() {
        assert_eq!(parse_salary_range("$120k-$180k"), (Some(120_000), Some(180_000)));
        assert_eq!(parse_salary_range("$120,000 - $180,000"), (Some(120_000), Some(180_000)));
        assert_eq!(parse_salary_range("pay is $90 - $130 (thousands)"), (Some(90_000), Some(130_000)));
        assert_eq!(parse_salary_range("no numbers here"), (None, None));
    }

    #[test]
    fn test_filter_remoteok_matches_tags_and_skips_nonmatching() {
        let raw = vec![
            serde_json::json!({
                "id": 1, "position": "Rust Engineer", "company": "Ferrous",
                "location": "", "url": "https://remoteok.io/remote-jobs/1",
                "description": "<p>Systems work</p>", "tags": ["rust", "backend"],
                "salary_min": 100000, "salary_max": 150000
            }),
            serde_json::json!({
                "id": 2, "position": "Chef", "company": "Kitchen",
                "url": "https://remoteok.io/remote-jobs/2",
                "description": "cooking", "tags": []
            }),
        ];
        let jobs = filter_remoteok(&raw, "rust developer", 10);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "Rust Engineer");
        assert_eq!(jobs[0].location, "Remote");
        assert_eq!(jobs[0].description, "Systems work");
        assert_eq!(jobs[0].salary_min, Some(100_000));
    }

    #[test]
    fn test_collapse_near_duplicates() {
        let mk = |title: &str, company: &str, url: &str| NormalizedJob {
            title: title.to_string(),
            company: company.to_string(),
            location: String::new(),
            canonical_url: url.to_string(),
            description: String::new(),
            salary_min: None,
            salary_max: None,
            job_type: String::new(),
            source_name: "remoteok".to_string(),
            external_id: String::new(),
            posted_at: None,
        };
        let jobs = vec![
            mk("Senior Rust Engineer", "Ferrous", "https://a.test/1"),
            // Same URL modulo tracking params.
            mk("Senior Rust Engineer", "Ferrous", "https://a.test/1?utm=x"),
            // Near-identical title, same company, different URL.
            mk("Senior Rust Engineer ", "Ferrous", "https://b.test/2"),
            // Same title at another company is a different job.
            mk("Senior Rust Engineer", "Oxide", "https://c.test/3"),
        ];
        let kept = collapse_near_duplicates(jobs);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_parse_wwr_listing() {
        let html = r#"
            <section class="jobs"><ul>
              <li>
                <a href="/remote-jobs/acme-junior-developer">
                  <span class="title">Junior Developer</span>
                  <span class="company">Acme</span>
                  <span class="region">Anywhere in the World</span>
                </a>
              </li>
              <li class="view-all"><a href="/categories/all">View all</a></li>
            </ul></section>
        "#;
        let jobs = parse_wwr_listing(html, 10);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "Junior Developer");
        assert_eq!(jobs[0].company, "Acme");
        assert_eq!(jobs[0].location, "Anywhere in the World");
        assert_eq!(
            jobs[0].canonical_url,
            "https://weworkremotely.com/remote-jobs/acme-junior-developer"
        );
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_out_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        limiter.wait("host.test").await;
        limiter.wait("host.test").await;
        assert!(start.elapsed() >= Duration::from_millis(40));
        // Different hosts are independent.
        let start2 = Instant::now();
        limiter.wait("other.test").await;
        assert!(start2.elapsed() < Duration::from_millis(40));
    }
}
