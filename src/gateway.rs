use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::browser::{
    ElementRole, PageElement, PageSession, PageSnapshot, SessionError, SessionResult,
};
use crate::config::BrowserConfig;

/// Remote backend: a browser-control gateway driven by JSON
/// `{type:"req", id, method, params}` request envelopes. The gateway renders
/// pages in its own container and answers with an accessibility-tree snapshot
/// carrying `[ref=N]` element markers.
pub struct GatewaySession {
    client: reqwest::Client,
    base_url: String,
    token: String,
    request_id: u64,
    current_url: String,
}

#[derive(Debug, serde::Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    error: String,
}

impl GatewaySession {
    pub async fn start(config: &BrowserConfig) -> SessionResult<Self> {
        if config.gateway_url.is_empty() {
            return Err(SessionError::Backend("gateway_url is not configured".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        let mut session = Self {
            client,
            base_url: config.gateway_url.clone(),
            token: config.gateway_token.clone(),
            request_id: 0,
            current_url: String::new(),
        };
        session.send("browser.start", json!({})).await?;
        Ok(session)
    }

    async fn send(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> SessionResult<serde_json::Value> {
        self.request_id += 1;
        let envelope = json!({
            "type": "req",
            "id": self.request_id.to_string(),
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.base_url).json(&envelope);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SessionError::Timeout(Duration::from_secs(60))
            } else {
                SessionError::Disconnected(e.to_string())
            }
        })?;
        let response = response
            .error_for_status()
            .map_err(|e| SessionError::Disconnected(e.to_string()))?;

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| SessionError::Backend(format!("bad gateway envelope: {}", e)))?;
        if !envelope.ok {
            return Err(SessionError::Backend(format!("{}: {}", method, envelope.error)));
        }
        debug!(method, "gateway call ok");
        Ok(envelope.payload)
    }
}

#[async_trait]
impl PageSession for GatewaySession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> SessionResult<()> {
        let call = self.send("browser.navigate", json!({ "url": url }));
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => {
                result?;
                self.current_url = url.to_string();
                Ok(())
            }
            Err(_) => Err(SessionError::Timeout(timeout)),
        }
    }

    async fn snapshot(&mut self) -> SessionResult<PageSnapshot> {
        let payload = self.send("browser.snapshot", json!({})).await?;
        let tree = payload
            .get("snapshot")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SessionError::Backend("snapshot payload missing tree".to_string()))?;
        if let Some(url) = payload.get("url").and_then(|v| v.as_str()) {
            self.current_url = url.to_string();
        }
        Ok(parse_snapshot_tree(&self.current_url, tree))
    }

    async fn click(&mut self, ref_id: &str) -> SessionResult<()> {
        self.send("browser.click", json!({ "ref": ref_id })).await?;
        Ok(())
    }

    async fn type_text(&mut self, ref_id: &str, text: &str) -> SessionResult<()> {
        self.send("browser.type", json!({ "ref": ref_id, "text": text })).await?;
        Ok(())
    }

    async fn upload(&mut self, ref_id: &str, file_path: &str) -> SessionResult<()> {
        self.send("browser.upload", json!({ "ref": ref_id, "path": file_path })).await?;
        Ok(())
    }

    async fn stop(&mut self) -> SessionResult<()> {
        self.send("browser.stop", json!({})).await?;
        Ok(())
    }
}

/// Parse an accessibility-tree snapshot into the common page model.
///
/// Tree lines look like:
///   - textbox "First Name" [ref=e3] required
///   - button "Submit Application" [ref=e7]
///   - link "Apply on company site" [ref=e9] url=https://acme.example/jobs
/// Non-element lines are page text.
fn parse_snapshot_tree(url: &str, tree: &str) -> PageSnapshot {
    let line_re = Regex::new(
        r#"(?x)
        (?P<role>textbox|searchbox|textarea|combobox|listbox|select|button|link|checkbox|radio|file)
        (?:\s+"(?P<label>[^"]*)")?
        \s*\[ref=(?P<ref>\w+)\]
        (?P<rest>[^\n]*)
        "#,
    );
    let line_re = match line_re {
        Ok(re) => re,
        Err(_) => return PageSnapshot { url: url.to_string(), ..Default::default() },
    };

    let mut elements = Vec::new();
    let mut text_lines = Vec::new();

    for line in tree.lines() {
        let trimmed = line.trim().trim_start_matches('-').trim();
        if let Some(caps) = line_re.captures(trimmed) {
            let role = match &caps["role"] {
                "textbox" | "searchbox" => ElementRole::TextInput,
                "textarea" => ElementRole::TextArea,
                "combobox" | "listbox" | "select" => ElementRole::Select,
                "button" => ElementRole::Button,
                "link" => ElementRole::Link,
                "checkbox" | "radio" => ElementRole::Checkbox,
                "file" => ElementRole::FileInput,
                _ => continue,
            };
            let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
            let href = rest
                .split_whitespace()
                .find_map(|tok| tok.strip_prefix("url="))
                .unwrap_or("")
                .to_string();
            let value = rest
                .split_whitespace()
                .find_map(|tok| tok.strip_prefix("value="))
                .unwrap_or("")
                .to_string();
            elements.push(PageElement {
                ref_id: caps["ref"].to_string(),
                role,
                label: caps.name("label").map(|m| m.as_str()).unwrap_or("").to_string(),
                value,
                required: rest.contains("required"),
                href,
            });
        } else if !trimmed.is_empty() {
            text_lines.push(trimmed.to_string());
        }
    }

    PageSnapshot { url: url.to_string(), text: text_lines.join("\n"), elements }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_tree_elements() {
        let tree = r#"
            heading "Apply for this role"
            - textbox "First Name" [ref=e1] required
            - textbox "Email" [ref=e2] required value=old@x.test
            - combobox "Do you require visa sponsorship?" [ref=e3] required
            - file "Resume" [ref=e4]
            - button "Submit Application" [ref=e5]
            - link "Apply on company site" [ref=e6] url=https://acme.example/jobs/1
            Thanks for your interest in Acme.
        "#;
        let snapshot = parse_snapshot_tree("https://board.example/view/1", tree);

        assert_eq!(snapshot.elements.len(), 6);
        let first = &snapshot.elements[0];
        assert_eq!(first.ref_id, "e1");
        assert_eq!(first.role, ElementRole::TextInput);
        assert_eq!(first.label, "First Name");
        assert!(first.required);

        assert_eq!(snapshot.elements[1].value, "old@x.test");
        assert_eq!(snapshot.elements[2].role, ElementRole::Select);
        assert_eq!(snapshot.elements[3].role, ElementRole::FileInput);
        assert_eq!(snapshot.elements[4].role, ElementRole::Button);
        assert_eq!(snapshot.elements[5].href, "https://acme.example/jobs/1");

        // Non-element lines become page text.
        assert!(snapshot.text.contains("Thanks for your interest"));
        assert!(!snapshot.text.contains("[ref="));
    }

    #[test]
    fn test_parse_snapshot_tree_unlabeled_element() {
        let tree = r#"- button [ref=e9]"#;
        let snapshot = parse_snapshot_tree("", tree);
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].label, "");
    }
}
