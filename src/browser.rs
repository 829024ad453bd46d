use std::time::Duration;

use async_trait::async_trait;

/// Failure modes shared by every browser backend.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("browser backend disconnected: {0}")]
    Disconnected(String),
    #[error("target element not found: {0}")]
    TargetNotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// What kind of widget an interactive element is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    TextInput,
    TextArea,
    Select,
    FileInput,
    Checkbox,
    Button,
    Link,
}

/// One interactive element in a page snapshot. `ref_id` is opaque to callers
/// and only meaningful to the backend that produced it, until the next
/// snapshot invalidates it.
#[derive(Debug, Clone)]
pub struct PageElement {
    pub ref_id: String,
    pub role: ElementRole,
    pub label: String,
    pub value: String,
    pub required: bool,
    /// Link target, when the element is a link.
    pub href: String,
}

/// A structured page representation: visible text plus interactive elements.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub url: String,
    pub text: String,
    pub elements: Vec<PageElement>,
}

impl PageSnapshot {
    /// First element whose label (case-insensitive) contains any of the given
    /// needles, in needle order. Specific labels must be listed before broad
    /// ones; first match wins.
    pub fn find_labeled(&self, roles: &[ElementRole], needles: &[&str]) -> Option<&PageElement> {
        for needle in needles {
            let needle_lower = needle.to_lowercase();
            if let Some(el) = self
                .elements
                .iter()
                .find(|e| roles.contains(&e.role) && e.label.to_lowercase().contains(&needle_lower))
            {
                return Some(el);
            }
        }
        None
    }

}

/// Uniform browser capability interface. Sessions are stateful (cookies and
/// navigation persist across calls) and must be explicitly stopped; callers
/// never assume a page has settled synchronously after navigate/click.
#[async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> SessionResult<()>;
    async fn snapshot(&mut self) -> SessionResult<PageSnapshot>;
    async fn click(&mut self, ref_id: &str) -> SessionResult<()>;
    async fn type_text(&mut self, ref_id: &str, text: &str) -> SessionResult<()>;
    async fn upload(&mut self, ref_id: &str, file_path: &str) -> SessionResult<()>;
    async fn stop(&mut self) -> SessionResult<()>;
}

/// Human-like randomized delay after navigations and clicks. Lets async page
/// rendering settle (premature field access on an unsettled page silently
/// fails) and avoids a fixed-interval automation signature.
pub async fn settle_delay(min_ms: u64, max_ms: u64) {
    use rand::Rng;
    let ms = {
        let mut rng = rand::thread_rng();
        rng.gen_range(min_ms..=max_ms.max(min_ms))
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
