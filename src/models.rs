use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A job posting normalized from any source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub canonical_url: String,
    pub description: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub job_type: String,
    pub source_name: String, // "remoteok", "hn_hiring", "jsearch", "weworkremotely"
    pub external_id: String,
    pub posted_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperienceEntry {
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub dates: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EducationEntry {
    pub degree: String,
    pub school: String,
    #[serde(default)]
    pub year: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileLinks {
    #[serde(default)]
    pub linkedin: String,
    #[serde(default)]
    pub github: String,
    #[serde(default)]
    pub website: String,
}

/// Parsed resume data. Immutable snapshot for the lifetime of an attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub links: ProfileLinks,
}

impl CandidateProfile {
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }

    pub fn last_name(&self) -> &str {
        let mut parts = self.name.split_whitespace();
        let first = parts.next();
        match parts.last() {
            Some(last) => last,
            None => first.unwrap_or(""),
        }
    }

    pub fn current_title(&self) -> &str {
        self.experience.first().map(|e| e.title.as_str()).unwrap_or("")
    }

    pub fn current_company(&self) -> &str {
        self.experience.first().map(|e| e.company.as_str()).unwrap_or("")
    }
}

/// An ordered question-pattern -> answer override, consulted before the
/// built-in screening table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningOverride {
    pub pattern: String,
    pub answer: String,
}

/// Search and auto-apply configuration. Mutable by the user, read-only to a
/// pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub keywords: Vec<String>,
    pub excluded_keywords: Vec<String>,
    pub location: String,
    pub remote_ok: bool,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub enabled_sources: Vec<String>,
    pub auto_apply_threshold: i32,
    pub daily_application_cap: i64,
    #[serde(default)]
    pub screening_overrides: Vec<ScreeningOverride>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            keywords: vec!["Software Developer".to_string()],
            excluded_keywords: Vec::new(),
            location: "Toronto".to_string(),
            remote_ok: true,
            salary_min: None,
            salary_max: None,
            enabled_sources: vec!["remoteok".to_string(), "hn_hiring".to_string()],
            auto_apply_threshold: 70,
            daily_application_cap: 10,
            screening_overrides: Vec::new(),
        }
    }
}

/// A discovered job with its match score. One row per url_hash; re-discovery
/// never duplicates or rescores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredListing {
    pub id: i64,
    pub job: NormalizedJob,
    pub match_score: i32,
    pub score_breakdown: BTreeMap<String, i32>,
    pub matched_keywords: Vec<String>,
    pub url_hash: String,
    pub dismissed: bool,
    pub discovered_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Queued,
    GeneratingCover,
    Applying,
    Applied,
    Failed,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Queued => "queued",
            ApplicationStatus::GeneratingCover => "generating_cover",
            ApplicationStatus::Applying => "applying",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ApplicationStatus::Queued),
            "generating_cover" => Some(ApplicationStatus::GeneratingCover),
            "applying" => Some(ApplicationStatus::Applying),
            "applied" => Some(ApplicationStatus::Applied),
            "failed" => Some(ApplicationStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded browser action inside an application attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationStep {
    pub step: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub element_ref: String,
    pub result: String,
    pub timestamp: String,
}

/// One attempt to apply to one listing. Never deleted, only transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub listing_id: i64,
    pub status: ApplicationStatus,
    pub cover_letter: String,
    pub applied_via: String,
    pub error_message: String,
    pub retry_count: i32,
    pub automation_log: Vec<AutomationStep>,
    pub applied_at: Option<String>,
    pub created_at: String,
}

/// Per-day rollup of pipeline activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: String,
    pub jobs_discovered: i64,
    pub applications_sent: i64,
    pub applications_failed: i64,
    pub high_score_jobs: i64,
    pub summary_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_splitting() {
        let profile = CandidateProfile {
            name: "Ada Marie Lovelace".to_string(),
            ..Default::default()
        };
        assert_eq!(profile.first_name(), "Ada");
        assert_eq!(profile.last_name(), "Lovelace");

        let single = CandidateProfile {
            name: "Ada".to_string(),
            ..Default::default()
        };
        assert_eq!(single.first_name(), "Ada");
        assert_eq!(single.last_name(), "Ada");

        let empty = CandidateProfile::default();
        assert_eq!(empty.first_name(), "");
        assert_eq!(empty.last_name(), "");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ApplicationStatus::Queued,
            ApplicationStatus::GeneratingCover,
            ApplicationStatus::Applying,
            ApplicationStatus::Applied,
            ApplicationStatus::Failed,
        ] {
            assert_eq!(ApplicationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApplicationStatus::parse("rejected"), None);
    }
}
