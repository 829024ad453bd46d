use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tracing::debug;

use crate::browser::{
    ElementRole, PageElement, PageSession, PageSnapshot, SessionError, SessionResult,
};
use crate::config::BrowserConfig;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                  AppleWebKit/537.36 (KHTML, like Gecko) \
                                  Chrome/122.0.0.0 Safari/537.36";
const MAX_SNAPSHOT_ELEMENTS: usize = 150;

/// Local backend: WebDriver (chromedriver) via thirtyfour.
pub struct WebDriverSession {
    driver: Option<WebDriver>,
    elements: HashMap<String, WebElement>,
    next_ref: usize,
}

impl WebDriverSession {
    pub async fn start(config: &BrowserConfig) -> SessionResult<Self> {
        let mut caps = DesiredCapabilities::chrome();
        if config.headless {
            caps.add_arg("--headless=new").map_err(wd_err)?;
        }
        caps.add_arg("--no-sandbox").map_err(wd_err)?;
        caps.add_arg("--disable-dev-shm-usage").map_err(wd_err)?;
        caps.add_arg("--disable-blink-features=AutomationControlled").map_err(wd_err)?;
        caps.add_arg("--window-size=1920,1080").map_err(wd_err)?;
        caps.add_arg(&format!("--user-agent={}", DESKTOP_USER_AGENT)).map_err(wd_err)?;

        let driver = WebDriver::new(&config.webdriver_url, caps)
            .await
            .map_err(|e| SessionError::Disconnected(format!(
                "could not reach WebDriver at {}: {}",
                config.webdriver_url, e
            )))?;

        Ok(Self { driver: Some(driver), elements: HashMap::new(), next_ref: 0 })
    }

    fn driver(&self) -> SessionResult<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| SessionError::Disconnected("session already stopped".to_string()))
    }

    fn lookup(&self, ref_id: &str) -> SessionResult<&WebElement> {
        self.elements
            .get(ref_id)
            .ok_or_else(|| SessionError::TargetNotFound(ref_id.to_string()))
    }

    fn register(&mut self, element: WebElement) -> String {
        let ref_id = format!("e{}", self.next_ref);
        self.next_ref += 1;
        self.elements.insert(ref_id.clone(), element);
        ref_id
    }

}

/// Best label for a field: aria-label, placeholder, an associated
/// <label for=...>, then the name attribute.
async fn element_label(driver: &WebDriver, element: &WebElement) -> String {
    for attr in ["aria-label", "placeholder"] {
        if let Ok(Some(value)) = element.attr(attr).await {
            if !value.trim().is_empty() {
                return value.trim().to_string();
            }
        }
    }
    if let Ok(Some(id)) = element.attr("id").await {
        if !id.is_empty() && !id.contains('\'') {
            if let Ok(label_el) =
                driver.find(By::Css(format!("label[for='{}']", id).as_str())).await
            {
                if let Ok(text) = label_el.text().await {
                    if !text.trim().is_empty() {
                        return text.trim().to_string();
                    }
                }
            }
        }
    }
    if let Ok(Some(name)) = element.attr("name").await {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    String::new()
}

fn wd_err(e: WebDriverError) -> SessionError {
    let msg = e.to_string();
    if msg.to_lowercase().contains("timeout") || msg.to_lowercase().contains("timed out") {
        SessionError::Timeout(Duration::from_secs(0))
    } else {
        SessionError::Backend(msg)
    }
}

#[async_trait]
impl PageSession for WebDriverSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> SessionResult<()> {
        self.elements.clear();
        let driver = self.driver()?;
        driver.set_page_load_timeout(timeout).await.map_err(wd_err)?;
        match tokio::time::timeout(timeout, driver.goto(url)).await {
            Ok(result) => result.map_err(wd_err),
            Err(_) => Err(SessionError::Timeout(timeout)),
        }
    }

    async fn snapshot(&mut self) -> SessionResult<PageSnapshot> {
        let driver = self.driver()?.clone();
        let url = driver
            .current_url()
            .await
            .map_err(wd_err)?
            .to_string();
        let text = match driver.find(By::Tag("body")).await {
            Ok(body) => body.text().await.unwrap_or_default(),
            Err(_) => String::new(),
        };

        let found = driver
            .find_all(By::Css("input, textarea, select, button, a"))
            .await
            .map_err(wd_err)?;

        self.elements.clear();
        self.next_ref = 0;
        let mut elements = Vec::new();

        for element in found.into_iter().take(MAX_SNAPSHOT_ELEMENTS) {
            let tag = element.tag_name().await.unwrap_or_default().to_lowercase();
            let input_type = element
                .attr("type")
                .await
                .ok()
                .flatten()
                .unwrap_or_default()
                .to_lowercase();

            let role = match (tag.as_str(), input_type.as_str()) {
                (_, "hidden") => continue,
                (_, "file") => ElementRole::FileInput,
                (_, "checkbox") | (_, "radio") => ElementRole::Checkbox,
                (_, "submit") | ("button", _) => ElementRole::Button,
                ("a", _) => ElementRole::Link,
                ("textarea", _) => ElementRole::TextArea,
                ("select", _) => ElementRole::Select,
                ("input", _) => ElementRole::TextInput,
                _ => continue,
            };

            // File inputs are often visually hidden behind dropzones but
            // still accept uploads; everything else must be visible.
            if role != ElementRole::FileInput {
                match element.is_displayed().await {
                    Ok(true) => {}
                    _ => continue,
                }
            }

            let label = match role {
                ElementRole::Button | ElementRole::Link => {
                    let text = element.text().await.unwrap_or_default();
                    if text.trim().is_empty() {
                        element_label(&driver, &element).await
                    } else {
                        text.trim().to_string()
                    }
                }
                _ => element_label(&driver, &element).await,
            };
            let value = element.prop("value").await.ok().flatten().unwrap_or_default();
            let required = matches!(element.attr("required").await, Ok(Some(_)))
                || matches!(element.attr("aria-required").await, Ok(Some(ref v)) if v == "true");
            let href = if role == ElementRole::Link {
                element.attr("href").await.ok().flatten().unwrap_or_default()
            } else {
                String::new()
            };

            let ref_id = self.register(element);
            elements.push(PageElement { ref_id, role, label, value, required, href });
        }

        debug!(url = %url, elements = elements.len(), "webdriver snapshot");
        Ok(PageSnapshot { url, text, elements })
    }

    async fn click(&mut self, ref_id: &str) -> SessionResult<()> {
        let element = self.lookup(ref_id)?;
        element.scroll_into_view().await.ok();
        element.click().await.map_err(|e| match e {
            WebDriverError::NoSuchElement(_) => SessionError::TargetNotFound(ref_id.to_string()),
            other => wd_err(other),
        })
    }

    async fn type_text(&mut self, ref_id: &str, text: &str) -> SessionResult<()> {
        let element = self.lookup(ref_id)?;
        element.scroll_into_view().await.ok();
        element.clear().await.ok();
        element.send_keys(text).await.map_err(wd_err)
    }

    async fn upload(&mut self, ref_id: &str, file_path: &str) -> SessionResult<()> {
        // Accept a snapshot ref or, for dropzone widgets, a raw CSS selector.
        if let Ok(element) = self.lookup(ref_id) {
            return element.send_keys(file_path).await.map_err(wd_err);
        }
        let driver = self.driver()?;
        let element = driver
            .find(By::Css(ref_id))
            .await
            .map_err(|_| SessionError::TargetNotFound(ref_id.to_string()))?;
        element.send_keys(file_path).await.map_err(wd_err)
    }

    async fn stop(&mut self) -> SessionResult<()> {
        self.elements.clear();
        if let Some(driver) = self.driver.take() {
            driver.quit().await.map_err(wd_err)?;
        }
        Ok(())
    }
}
