use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::models::{CandidateProfile, NormalizedJob, Preferences};

// Component weights. Tunable, but the component structure and the [0,100]
// clamp are load-bearing: auto-apply thresholds are expressed on this scale.
const CORE_SKILL_POINTS: i32 = 5;
const OTHER_SKILL_POINTS: i32 = 3;
const PREF_KEYWORD_TITLE_POINTS: i32 = 8;
const PREF_KEYWORD_DESC_POINTS: i32 = 4;
const KEYWORD_CAP: i32 = 40;
const DOMAIN_CAP: i32 = 15;
const EXCLUDED_PENALTY: i32 = -20;
const LOCATION_CAP: i32 = 15;
const SENIORITY_CAP: i32 = 15;
const QUALITY_CAP: i32 = 15;
const QUALITY_LENGTH_POINTS: i32 = 5;
const QUALITY_TECH_POINTS: i32 = 3;
const QUALITY_TECH_CAP: i32 = 10;

/// Skills weighted higher than the rest of the candidate's skill list.
const CORE_SKILLS: &[&str] = &[
    "python", "django", "react", "typescript", "javascript", "next.js",
    "postgresql", "docker", "aws", "llm", "ai", "machine learning",
    "rest api", "rest apis",
];

const DOMAIN_TERMS: &[&str] = &[
    "ai", "artificial intelligence", "machine learning", "ml", "llm",
    "large language model", "claude", "anthropic", "openai", "gpt",
    "generative ai", "gen ai", "natural language processing", "nlp",
    "deep learning",
];

/// Broader-region fallback for the location component.
const REGIONAL_TERMS: &[&str] = &["canada", "ontario"];

const CORE_TECH: &[&str] = &["django", "react", "python", "typescript", "next.js", "postgresql"];

#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub score: i32,
    pub breakdown: BTreeMap<String, i32>,
    pub matched_keywords: Vec<String>,
}

/// Strip the fragment and query from a posting URL. Tracking parameters churn
/// between fetches; the canonical form is what dedup keys on.
pub fn canonical_url(url: &str) -> String {
    let no_fragment = match url.find('#') {
        Some(idx) => &url[..idx],
        None => url,
    };
    let no_query = match no_fragment.find('?') {
        Some(idx) => &no_fragment[..idx],
        None => no_fragment,
    };
    no_query.trim_end_matches('/').to_string()
}

/// Dedup key: hex sha256 of the canonical URL.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url(url).as_bytes());
    hex::encode(hasher.finalize())
}

/// Score a job against the candidate profile and preferences.
/// Additive across fixed-weight components, clamped to [0,100].
pub fn score_listing(
    job: &NormalizedJob,
    profile: &CandidateProfile,
    prefs: &Preferences,
) -> ScoreResult {
    let mut score = 0;
    let mut breakdown = BTreeMap::new();
    let mut matched: Vec<String> = Vec::new();

    let title_lower = job.title.to_lowercase();
    let desc_lower = job.description.to_lowercase();
    let location_lower = job.location.to_lowercase();
    let combined = format!("{} {}", title_lower, desc_lower);

    // 1. Skill keyword match
    let mut keyword_points = 0;
    for skill in &profile.skills {
        let skill_lower = skill.to_lowercase();
        if combined.contains(&skill_lower) {
            keyword_points += if CORE_SKILLS.contains(&skill_lower.as_str()) {
                CORE_SKILL_POINTS
            } else {
                OTHER_SKILL_POINTS
            };
            matched.push(skill_lower);
        }
    }

    // Preference keywords: a title hit is a stronger signal than a
    // description hit. Each keyword is counted once, first match wins.
    for kw in &prefs.keywords {
        let kw_lower = kw.to_lowercase();
        if matched.contains(&kw_lower) {
            continue;
        }
        if title_lower.contains(&kw_lower) {
            keyword_points += PREF_KEYWORD_TITLE_POINTS;
            matched.push(kw_lower);
        } else if desc_lower.contains(&kw_lower) {
            keyword_points += PREF_KEYWORD_DESC_POINTS;
            matched.push(kw_lower);
        }
    }

    let keyword_score = keyword_points.min(KEYWORD_CAP);
    score += keyword_score;
    breakdown.insert("keyword_match".to_string(), keyword_score);

    // 2. Domain relevance bonus
    let domain_hits = DOMAIN_TERMS.iter().filter(|t| combined.contains(*t)).count();
    let domain_score = match domain_hits {
        0 => 0,
        1 => 5,
        2 => 10,
        _ => DOMAIN_CAP,
    };
    score += domain_score;
    breakdown.insert("domain_relevance".to_string(), domain_score);

    // 3. Excluded keyword penalty: flat, once.
    for excluded in &prefs.excluded_keywords {
        if combined.contains(&excluded.to_lowercase()) {
            score += EXCLUDED_PENALTY;
            breakdown.insert("excluded_penalty".to_string(), EXCLUDED_PENALTY);
            break;
        }
    }

    // 4. Location match
    let pref_location = prefs.location.to_lowercase();
    let location_score = if !pref_location.is_empty() && location_lower.contains(&pref_location) {
        LOCATION_CAP
    } else if location_lower.contains("remote") || location_lower.contains("anywhere") {
        if prefs.remote_ok { 12 } else { 5 }
    } else if REGIONAL_TERMS.iter().any(|t| location_lower.contains(t)) {
        8
    } else {
        0
    };
    score += location_score;
    breakdown.insert("location_match".to_string(), location_score);

    // 5. Seniority fit: junior/entry roles score highest.
    let seniority_score = if title_lower.contains("junior")
        || title_lower.contains("entry")
        || title_lower.contains("jr")
    {
        SENIORITY_CAP
    } else if title_lower.contains("intern") {
        10
    } else if title_lower.contains("mid") || combined.contains("3+") || combined.contains("3 years")
    {
        12
    } else if title_lower.contains("senior")
        || combined.contains("5+")
        || combined.contains("5 years")
    {
        5
    } else if title_lower.contains("staff")
        || title_lower.contains("principal")
        || title_lower.contains("lead")
    {
        3
    } else {
        10 // unspecified, likely open to various levels
    };
    score += seniority_score;
    breakdown.insert("seniority_fit".to_string(), seniority_score);

    // 6. Description quality
    let mut quality_score = 0;
    if job.description.len() > 200 {
        quality_score += QUALITY_LENGTH_POINTS;
    }
    let tech_mentions = CORE_TECH.iter().filter(|t| desc_lower.contains(*t)).count() as i32;
    quality_score += (tech_mentions * QUALITY_TECH_POINTS).min(QUALITY_TECH_CAP);
    quality_score = quality_score.min(QUALITY_CAP);
    score += quality_score;
    breakdown.insert("description_quality".to_string(), quality_score);

    ScoreResult {
        score: score.clamp(0, 100),
        breakdown,
        matched_keywords: matched,
    }
}
