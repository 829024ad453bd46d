mod ai;
mod ats;
mod browser;
mod config;
mod db;
mod gateway;
mod models;
mod pipeline;
mod scoring;
mod sources;
#[cfg(test)]
mod testutil;
mod verify;
mod webdriver;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use db::Database;
use models::{ApplicationStatus, CandidateProfile, Preferences, ScreeningOverride};
use pipeline::Pipeline;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pursuit")]
#[command(about = "Job application automation - discover, score, and apply")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage the candidate profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// View or change search and auto-apply preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },

    /// Search all enabled sources, score and store new listings
    Discover,

    /// List scored listings
    Listings {
        /// Only show listings at or above this score
        #[arg(short, long)]
        min_score: Option<i32>,

        /// Number of listings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one listing in full
    Show {
        /// Listing ID
        id: i64,
    },

    /// Hide a listing from queueing and listing output
    Dismiss {
        /// Listing ID
        id: i64,
    },

    /// Recompute all listing scores with the current profile and preferences
    Rescore,

    /// Queue applications for every listing above the auto-apply threshold
    Queue,

    /// Queue one listing and apply to it immediately
    Apply {
        /// Listing ID
        listing_id: i64,
    },

    /// Process all queued applications
    Process,

    /// Full daily pipeline: discover, queue, process, summarize
    Run,

    /// List applications
    Applications {
        /// Filter by status (queued, generating_cover, applying, applied, failed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one application including its automation log
    Application {
        /// Application ID
        id: i64,
    },

    /// Retry a failed application (bounded)
    Retry {
        /// Application ID
        id: i64,
    },

    /// Today's discovery and application summary
    Status,
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Import a pre-parsed profile JSON file
    Import {
        /// Path to profile JSON
        file: PathBuf,

        /// Optional raw resume text file (used for cover letters)
        #[arg(short, long)]
        resume: Option<PathBuf>,
    },

    /// Parse a raw resume text file with the configured AI provider
    Parse {
        /// Path to resume text file
        file: PathBuf,
    },

    /// Show the stored profile
    Show,
}

#[derive(Subcommand)]
enum PrefsCommands {
    /// Show current preferences and the screening answer table
    Show,

    /// Update preferences (only the given flags change)
    Set {
        /// Comma-separated search keywords
        #[arg(long)]
        keywords: Option<String>,

        /// Comma-separated excluded keywords
        #[arg(long)]
        excluded: Option<String>,

        /// Preferred location
        #[arg(long)]
        location: Option<String>,

        /// Whether remote postings are acceptable
        #[arg(long)]
        remote_ok: Option<bool>,

        /// Comma-separated enabled sources (remoteok, hn_hiring, jsearch, weworkremotely)
        #[arg(long)]
        sources: Option<String>,

        /// Minimum acceptable salary
        #[arg(long)]
        salary_min: Option<i64>,

        /// Maximum salary of interest
        #[arg(long)]
        salary_max: Option<i64>,

        /// Auto-apply score threshold (0-100)
        #[arg(long)]
        threshold: Option<i32>,

        /// Daily application cap
        #[arg(long)]
        daily_cap: Option<i64>,

        /// Screening answer override, "pattern=answer"; repeatable, checked
        /// before the built-in table
        #[arg(long = "screen")]
        screen: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pursuit=warn")),
        )
        .init();

    let cli = Cli::parse();
    let db = Database::open()?;
    let config = Config::load()?;
    let pipeline = Pipeline::new(db, config);

    match cli.command {
        Commands::Init => {
            pipeline.db.init()?;
            println!("Database initialized at {}", pipeline.db.path().display());
        }

        Commands::Profile { command } => {
            pipeline.db.ensure_initialized()?;
            match command {
                ProfileCommands::Import { file, resume } => {
                    let raw = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let profile: CandidateProfile = serde_json::from_str(&raw)
                        .context("Profile JSON did not match the expected shape")?;
                    let resume_text = match resume {
                        Some(path) => std::fs::read_to_string(&path)
                            .with_context(|| format!("Failed to read {}", path.display()))?,
                        None => raw.clone(),
                    };
                    pipeline.db.save_profile(&profile, &resume_text)?;
                    println!("Imported profile for {} ({} skills)", profile.name, profile.skills.len());
                }

                ProfileCommands::Parse { file } => {
                    let text = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let provider = ai::create_provider(&pipeline.config.ai)?;
                    println!("Parsing resume...");
                    let profile = ai::parse_resume(provider.as_ref(), &text).await?;
                    pipeline.db.save_profile(&profile, &text)?;
                    println!("Parsed and saved profile for {} ({} skills)", profile.name, profile.skills.len());
                }

                ProfileCommands::Show => match pipeline.db.get_profile()? {
                    Some((profile, _)) => {
                        println!("Name: {}", profile.name);
                        println!("Email: {}", profile.email);
                        if !profile.summary.is_empty() {
                            println!("Summary: {}", profile.summary);
                        }
                        if !profile.phone.is_empty() {
                            println!("Phone: {}", profile.phone);
                        }
                        if !profile.location.is_empty() {
                            println!("Location: {}", profile.location);
                        }
                        if !profile.skills.is_empty() {
                            println!("Skills: {}", profile.skills.join(", "));
                        }
                        for exp in &profile.experience {
                            println!("  {} at {} ({})", exp.title, exp.company, exp.dates);
                        }
                        for edu in &profile.education {
                            println!("  {} - {} ({})", edu.degree, edu.school, edu.year);
                        }
                    }
                    None => println!("No profile imported yet. Run 'pursuit profile import' or 'pursuit profile parse'."),
                },
            }
        }

        Commands::Prefs { command } => {
            pipeline.db.ensure_initialized()?;
            match command {
                PrefsCommands::Show => {
                    let prefs = pipeline.db.get_preferences()?;
                    print_prefs(&prefs);
                }
                PrefsCommands::Set {
                    keywords,
                    excluded,
                    location,
                    remote_ok,
                    sources,
                    salary_min,
                    salary_max,
                    threshold,
                    daily_cap,
                    screen,
                } => {
                    let mut prefs = pipeline.db.get_preferences()?;
                    if let Some(kw) = keywords {
                        prefs.keywords = split_csv(&kw);
                    }
                    if let Some(ex) = excluded {
                        prefs.excluded_keywords = split_csv(&ex);
                    }
                    if let Some(loc) = location {
                        prefs.location = loc;
                    }
                    if let Some(remote) = remote_ok {
                        prefs.remote_ok = remote;
                    }
                    if let Some(src) = sources {
                        let enabled = split_csv(&src);
                        for s in &enabled {
                            if !sources::KNOWN_SOURCES.contains(&s.as_str()) {
                                return Err(anyhow!(
                                    "Unknown source '{}'. Available: {}",
                                    s,
                                    sources::KNOWN_SOURCES.join(", ")
                                ));
                            }
                        }
                        prefs.enabled_sources = enabled;
                    }
                    if salary_min.is_some() {
                        prefs.salary_min = salary_min;
                    }
                    if salary_max.is_some() {
                        prefs.salary_max = salary_max;
                    }
                    if let Some(t) = threshold {
                        if !(0..=100).contains(&t) {
                            return Err(anyhow!("Threshold must be between 0 and 100"));
                        }
                        prefs.auto_apply_threshold = t;
                    }
                    if let Some(cap) = daily_cap {
                        prefs.daily_application_cap = cap;
                    }
                    for rule in screen {
                        let (pattern, answer) = rule
                            .split_once('=')
                            .ok_or_else(|| anyhow!("Screening override must be 'pattern=answer'"))?;
                        prefs.screening_overrides.push(ScreeningOverride {
                            pattern: pattern.trim().to_lowercase(),
                            answer: answer.trim().to_string(),
                        });
                    }
                    pipeline.db.save_preferences(&prefs)?;
                    print_prefs(&prefs);
                }
            }
        }

        Commands::Discover => {
            pipeline.db.ensure_initialized()?;
            println!("Searching enabled sources...");
            let stats = pipeline.discover().await?;
            println!("\nResults:");
            println!("  Jobs found:   {}", stats.total_discovered);
            println!("  New listings: {}", stats.new_listings);
            for (source, error) in &stats.failures {
                println!("  {} failed: {}", source, error);
            }
        }

        Commands::Listings { min_score, limit } => {
            pipeline.db.ensure_initialized()?;
            let listings = pipeline.db.list_listings(min_score, limit)?;
            if listings.is_empty() {
                println!("No listings found. Run 'pursuit discover' first.");
            } else {
                println!(
                    "{:<6} {:>5} {:<30} {:<20} {:<18} {:<14}",
                    "ID", "SCORE", "TITLE", "COMPANY", "LOCATION", "SOURCE"
                );
                println!("{}", "-".repeat(97));
                for listing in listings {
                    println!(
                        "{:<6} {:>5} {:<30} {:<20} {:<18} {:<14}",
                        listing.id,
                        listing.match_score,
                        truncate(&listing.job.title, 28),
                        truncate(&listing.job.company, 18),
                        truncate(&listing.job.location, 16),
                        listing.job.source_name
                    );
                }
            }
        }

        Commands::Show { id } => {
            pipeline.db.ensure_initialized()?;
            match pipeline.db.get_listing(id)? {
                Some(listing) => {
                    println!("Listing #{}", listing.id);
                    println!("Title: {}", listing.job.title);
                    println!("Company: {}", listing.job.company);
                    if !listing.job.location.is_empty() {
                        println!("Location: {}", listing.job.location);
                    }
                    println!("URL: {}", listing.job.canonical_url);
                    println!("Source: {}", listing.job.source_name);
                    match (listing.job.salary_min, listing.job.salary_max) {
                        (Some(min), Some(max)) => println!("Salary: ${} - ${}", min, max),
                        (Some(min), None) => println!("Salary: ${}+", min),
                        (None, Some(max)) => println!("Salary: up to ${}", max),
                        (None, None) => {}
                    }
                    println!("Score: {} {:?}", listing.match_score, listing.score_breakdown);
                    if !listing.matched_keywords.is_empty() {
                        println!("Matched: {}", listing.matched_keywords.join(", "));
                    }
                    println!("Discovered: {}", listing.discovered_at);
                    if !listing.job.description.is_empty() {
                        println!("\n--- Description ---\n{}", listing.job.description);
                    }
                }
                None => println!("Listing #{} not found.", id),
            }
        }

        Commands::Dismiss { id } => {
            pipeline.db.ensure_initialized()?;
            pipeline.db.dismiss_listing(id)?;
            println!("Dismissed listing #{}.", id);
        }

        Commands::Rescore => {
            pipeline.db.ensure_initialized()?;
            let count = pipeline.rescore()?;
            println!("Rescored {} listings.", count);
        }

        Commands::Queue => {
            pipeline.db.ensure_initialized()?;
            let queued = pipeline.queue_eligible()?;
            println!("Queued {} applications.", queued);
        }

        Commands::Apply { listing_id } => {
            pipeline.db.ensure_initialized()?;
            let app_id = pipeline.queue_listing(listing_id)?;
            println!("Queued application #{} - applying...", app_id);
            let status = pipeline.process_application(app_id).await?;
            print_attempt_result(&pipeline, app_id, status)?;
        }

        Commands::Process => {
            pipeline.db.ensure_initialized()?;
            let stats = pipeline.process_queue().await?;
            println!("Processed queue: {} applied, {} failed.", stats.applied, stats.failed);
        }

        Commands::Run => {
            pipeline.db.ensure_initialized()?;
            println!("Running full pipeline...");
            let summary = pipeline.run_daily().await?;
            println!("\n{}", summary.summary_text);
        }

        Commands::Applications { status } => {
            pipeline.db.ensure_initialized()?;
            let status = match status.as_deref() {
                Some(s) => Some(
                    ApplicationStatus::parse(s)
                        .ok_or_else(|| anyhow!("Unknown status '{}'", s))?,
                ),
                None => None,
            };
            let apps = pipeline.db.list_applications(status)?;
            if apps.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<18} {:<30} {:<14} {:>6}",
                    "ID", "STATUS", "TITLE", "VIA", "RETRY"
                );
                println!("{}", "-".repeat(78));
                for app in apps {
                    let title = pipeline
                        .db
                        .get_listing(app.listing_id)?
                        .map(|l| l.job.title)
                        .unwrap_or_default();
                    println!(
                        "{:<6} {:<18} {:<30} {:<14} {:>6}",
                        app.id,
                        app.status.as_str(),
                        truncate(&title, 28),
                        truncate(&app.applied_via, 12),
                        app.retry_count
                    );
                }
            }
        }

        Commands::Application { id } => {
            pipeline.db.ensure_initialized()?;
            match pipeline.db.get_application(id)? {
                Some(app) => {
                    println!("Application #{}", app.id);
                    if let Some(listing) = pipeline.db.get_listing(app.listing_id)? {
                        println!("Job: {} at {}", listing.job.title, listing.job.company);
                        println!("URL: {}", listing.job.canonical_url);
                    }
                    println!("Status: {}", app.status);
                    if !app.applied_via.is_empty() {
                        println!("Applied via: {}", app.applied_via);
                    }
                    if let Some(at) = &app.applied_at {
                        println!("Applied at: {}", at);
                    }
                    if !app.error_message.is_empty() {
                        println!("Note: {}", app.error_message);
                    }
                    println!("Retries: {}", app.retry_count);
                    println!("Created: {}", app.created_at);
                    if !app.cover_letter.is_empty() {
                        println!("\n--- Cover Letter ---\n{}", app.cover_letter);
                    }
                    if !app.automation_log.is_empty() {
                        println!("\n--- Automation Log ---");
                        for step in &app.automation_log {
                            println!("[{}] {}: {}", step.step, step.action, step.result);
                        }
                    }
                }
                None => println!("Application #{} not found.", id),
            }
        }

        Commands::Retry { id } => {
            pipeline.db.ensure_initialized()?;
            let status = pipeline.retry(id).await?;
            print_attempt_result(&pipeline, id, status)?;
        }

        Commands::Status => {
            pipeline.db.ensure_initialized()?;
            let today = chrono::Local::now().format("%Y-%m-%d").to_string();
            match pipeline.db.get_daily_summary(&today)? {
                Some(summary) => {
                    println!("Summary for {}:", summary.date);
                    print!("{}", summary.summary_text);
                }
                None => {
                    let count = pipeline.db.count_applications_today()?;
                    println!("No pipeline run recorded today. {} applications created today.", count);
                }
            }
        }
    }

    Ok(())
}

fn print_prefs(prefs: &Preferences) {
    println!("Keywords: {}", prefs.keywords.join(", "));
    println!("Excluded: {}", prefs.excluded_keywords.join(", "));
    println!("Location: {}", prefs.location);
    println!("Remote OK: {}", prefs.remote_ok);
    match (prefs.salary_min, prefs.salary_max) {
        (Some(min), Some(max)) => println!("Salary: ${} - ${}", min, max),
        (Some(min), None) => println!("Salary: ${}+", min),
        (None, Some(max)) => println!("Salary: up to ${}", max),
        (None, None) => {}
    }
    println!("Sources: {}", prefs.enabled_sources.join(", "));
    println!("Auto-apply threshold: {}", prefs.auto_apply_threshold);
    println!("Daily cap: {}", prefs.daily_application_cap);

    // The answer table drives real submitted applications; keep it visible.
    println!("\nScreening answers (checked top to bottom, first match wins):");
    for rule in &prefs.screening_overrides {
        println!("  {:<30} -> {}  (override)", rule.pattern, rule.answer);
    }
    for rule in ats::default_screening_rules() {
        println!("  {:<30} -> {}", rule.pattern, rule.answer);
    }
}

fn print_attempt_result(pipeline: &Pipeline, app_id: i64, status: ApplicationStatus) -> Result<()> {
    match pipeline.db.get_application(app_id)? {
        Some(app) => {
            println!("Application #{}: {}", app_id, status);
            if !app.applied_via.is_empty() {
                println!("Via: {}", app.applied_via);
            }
            if !app.error_message.is_empty() {
                println!("Note: {}", app.error_message);
            }
        }
        None => println!("Application #{}: {}", app_id, status),
    }
    Ok(())
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
