use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::models::CandidateProfile;

// --- Provider trait ---

#[async_trait]
pub trait AIProvider: Send + Sync {
    async fn complete(&self, prompt: &str, system: &str, max_tokens: u32) -> Result<String>;
    #[allow(dead_code)]
    fn model_name(&self) -> &str;
}

/// Pick a provider from config: explicit choice wins, otherwise the hosted
/// API when a key is present, else the local Ollama endpoint.
pub fn create_provider(config: &AiConfig) -> Result<Box<dyn AIProvider>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config))),
        "" => {
            if config.anthropic_api_key.is_empty() {
                Ok(Box::new(OllamaProvider::new(config)))
            } else {
                Ok(Box::new(AnthropicProvider::new(config)?))
            }
        }
        other => Err(anyhow!(
            "Unknown AI provider '{}'. Available: anthropic, ollama",
            other
        )),
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: &AiConfig) -> Result<Self> {
        if config.anthropic_api_key.is_empty() {
            return Err(anyhow!(
                "Anthropic API key not set. Set ANTHROPIC_API_KEY or ai.anthropic_api_key in the config file."
            ));
        }
        let model_id = if config.anthropic_model.is_empty() {
            DEFAULT_ANTHROPIC_MODEL.to_string()
        } else {
            config.anthropic_model.clone()
        };
        Ok(Self {
            api_key: config.anthropic_api_key.clone(),
            model_id,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl AIProvider for AnthropicProvider {
    async fn complete(&self, prompt: &str, system: &str, max_tokens: u32) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            system: system.to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .context("Anthropic API request failed")?
            .error_for_status()
            .context("Anthropic API returned an error")?;

        let body: AnthropicResponse = response.json().await.context("Bad Anthropic response")?;
        body.content
            .first()
            .map(|block| block.text.trim().to_string())
            .ok_or_else(|| anyhow!("Anthropic response had no content"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Ollama provider (local fallback) ---

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaProvider {
    base_url: String,
    model_id: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            base_url: if config.ollama_url.is_empty() {
                DEFAULT_OLLAMA_URL.to_string()
            } else {
                config.ollama_url.clone()
            },
            model_id: if config.ollama_model.is_empty() {
                DEFAULT_OLLAMA_MODEL.to_string()
            } else {
                config.ollama_model.clone()
            },
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AIProvider for OllamaProvider {
    async fn complete(&self, prompt: &str, system: &str, max_tokens: u32) -> Result<String> {
        let full_prompt = if system.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", system, prompt)
        };
        let request = OllamaRequest {
            model: self.model_id.clone(),
            prompt: full_prompt,
            stream: false,
            options: OllamaOptions { temperature: 0.7, num_predict: max_tokens },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Ollama request failed")?
            .error_for_status()
            .context("Ollama returned an error")?;

        let body: OllamaResponse = response.json().await.context("Bad Ollama response")?;
        Ok(body.response.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Cover letter generation ---

const COVER_LETTER_SYSTEM: &str = "You write concise, professional cover letters. \
No fluff. Match the candidate's specific skills to the job requirements. \
2-3 paragraphs max. Sound human, not AI-generated. \
Do NOT include placeholder brackets like [Company] - use the actual values provided. \
Do NOT include a header/address block - just the letter body.";

fn cover_letter_prompt(
    resume_text: &str,
    job_title: &str,
    company: &str,
    job_description: &str,
) -> String {
    let resume_head: String = resume_text.chars().take(3000).collect();
    let desc_head: String = job_description.chars().take(2000).collect();
    format!(
        "Write a cover letter for this job application.\n\n\
         CANDIDATE RESUME:\n{}\n\n\
         JOB POSTING:\nTitle: {}\nCompany: {}\nDescription: {}\n\n\
         Focus on matching the candidate's specific technical skills and experience to this role.\n\
         Mention relevant projects and achievements that demonstrate fit.\n\
         Keep it under 300 words.",
        resume_head, job_title, company, desc_head
    )
}

/// Single blocking call to the text-generation provider. Callers treat
/// failure as non-fatal.
pub async fn generate_cover_letter(
    provider: &dyn AIProvider,
    resume_text: &str,
    job_title: &str,
    company: &str,
    job_description: &str,
) -> Result<String> {
    let prompt = cover_letter_prompt(resume_text, job_title, company, job_description);
    provider.complete(&prompt, COVER_LETTER_SYSTEM, 1024).await
}

// --- Resume parsing ---

const RESUME_PARSE_SYSTEM: &str =
    "You parse resumes into structured JSON. Return ONLY valid JSON, no markdown formatting. \
     Use empty strings instead of null.";

fn resume_parse_prompt(text: &str) -> String {
    format!(
        r#"Parse this resume into structured JSON with these exact fields:
{{
  "name": "Full Name",
  "email": "email@example.com",
  "phone": "phone number or empty string",
  "location": "City, State/Province",
  "summary": "1-2 sentence professional summary",
  "skills": ["skill1", "skill2"],
  "experience": [
    {{"title": "Job Title", "company": "Company Name", "dates": "Start - End", "description": "Brief description"}}
  ],
  "education": [
    {{"degree": "Degree Name", "school": "School Name", "year": "Graduation Year"}}
  ],
  "links": {{"linkedin": "", "github": "", "website": ""}}
}}

Resume text:
{}"#,
        text
    )
}

pub async fn parse_resume(provider: &dyn AIProvider, text: &str) -> Result<CandidateProfile> {
    let response = provider.complete(&resume_parse_prompt(text), RESUME_PARSE_SYSTEM, 4096).await?;
    profile_from_json(&response)
}

/// Parse a (possibly fenced) JSON response into a profile.
pub fn profile_from_json(raw: &str) -> Result<CandidateProfile> {
    let stripped = strip_code_fences(raw);
    let mut value: serde_json::Value =
        serde_json::from_str(stripped).context("Provider did not return valid JSON")?;
    null_strings_to_empty(&mut value);
    serde_json::from_value(value).context("Provider JSON did not match the profile shape")
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the fence line (```json) and the closing fence.
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        return body.trim_end().trim_end_matches("```").trim_end();
    }
    trimmed
}

fn null_strings_to_empty(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for v in map.values_mut() {
                if v.is_null() {
                    *v = serde_json::Value::String(String::new());
                } else {
                    null_strings_to_empty(v);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                null_strings_to_empty(v);
            }
        }
        _ => {}
    }
}
