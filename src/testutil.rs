//! Scripted in-memory browser session for exercising the automation engine
//! without a real backend.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{
    ElementRole, PageElement, PageSession, PageSnapshot, SessionError, SessionResult,
};

#[derive(Debug, Clone)]
pub struct FakePage {
    pub url: String,
    pub text: String,
    pub elements: Vec<PageElement>,
}

impl FakePage {
    pub fn new(url: &str, text: &str, elements: Vec<PageElement>) -> Self {
        Self { url: url.to_string(), text: text.to_string(), elements }
    }
}

pub fn element(ref_id: &str, role: ElementRole, label: &str) -> PageElement {
    PageElement {
        ref_id: ref_id.to_string(),
        role,
        label: label.to_string(),
        value: String::new(),
        required: false,
        href: String::new(),
    }
}

pub fn text_input(ref_id: &str, label: &str) -> PageElement {
    element(ref_id, ElementRole::TextInput, label)
}

pub fn required_select(ref_id: &str, label: &str) -> PageElement {
    let mut el = element(ref_id, ElementRole::Select, label);
    el.required = true;
    el
}

pub fn button(ref_id: &str, label: &str) -> PageElement {
    element(ref_id, ElementRole::Button, label)
}

pub fn link(ref_id: &str, label: &str, href: &str) -> PageElement {
    let mut el = element(ref_id, ElementRole::Link, label);
    el.href = href.to_string();
    el
}

pub fn file_input(ref_id: &str, label: &str) -> PageElement {
    element(ref_id, ElementRole::FileInput, label)
}

/// Scripted session: navigation serves fixture pages by URL, clicks can swap
/// the current page or navigate, typing records values back into the page so
/// repair logic can observe them.
pub struct FakeSession {
    pages: HashMap<String, FakePage>,
    current: Option<FakePage>,
    click_nav: HashMap<String, String>,
    click_swap: HashMap<String, VecDeque<FakePage>>,
    pub actions: Vec<String>,
    pub stopped: bool,
    snapshot_count: usize,
    fail_snapshot_after: Option<usize>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            current: None,
            click_nav: HashMap::new(),
            click_swap: HashMap::new(),
            actions: Vec::new(),
            stopped: false,
            snapshot_count: 0,
            fail_snapshot_after: None,
        }
    }

    /// Simulate a backend dying mid-attempt: snapshots beyond the Nth fail.
    pub fn fail_snapshot_after(mut self, n: usize) -> Self {
        self.fail_snapshot_after = Some(n);
        self
    }

    pub fn page(mut self, page: FakePage) -> Self {
        self.pages.insert(page.url.clone(), page);
        self
    }

    /// Clicking `ref_id` behaves like a navigation to `url`.
    pub fn on_click_nav(mut self, ref_id: &str, url: &str) -> Self {
        self.click_nav.insert(ref_id.to_string(), url.to_string());
        self
    }

    /// Clicking `ref_id` replaces the current page (in order; the last swap
    /// repeats once the queue is drained).
    pub fn on_click_swap(mut self, ref_id: &str, page: FakePage) -> Self {
        self.click_swap.entry(ref_id.to_string()).or_default().push_back(page);
        self
    }

    fn load(&mut self, url: &str) {
        let page = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| FakePage::new(url, "", Vec::new()));
        self.current = Some(page);
    }
}

#[async_trait]
impl PageSession for FakeSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> SessionResult<()> {
        self.actions.push(format!("navigate:{}", url));
        self.load(url);
        Ok(())
    }

    async fn snapshot(&mut self) -> SessionResult<PageSnapshot> {
        self.snapshot_count += 1;
        if let Some(limit) = self.fail_snapshot_after {
            if self.snapshot_count > limit {
                return Err(SessionError::Disconnected("backend went away".to_string()));
            }
        }
        let page = self
            .current
            .as_ref()
            .ok_or_else(|| SessionError::Backend("no page loaded".to_string()))?;
        Ok(PageSnapshot {
            url: page.url.clone(),
            text: page.text.clone(),
            elements: page.elements.clone(),
        })
    }

    async fn click(&mut self, ref_id: &str) -> SessionResult<()> {
        self.actions.push(format!("click:{}", ref_id));
        if let Some(url) = self.click_nav.get(ref_id).cloned() {
            self.load(&url);
            return Ok(());
        }
        if let Some(queue) = self.click_swap.get_mut(ref_id) {
            let page = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(page) = page {
                self.current = Some(page);
                return Ok(());
            }
        }
        let exists = self
            .current
            .as_ref()
            .is_some_and(|p| p.elements.iter().any(|e| e.ref_id == ref_id));
        if exists {
            Ok(())
        } else {
            Err(SessionError::TargetNotFound(ref_id.to_string()))
        }
    }

    async fn type_text(&mut self, ref_id: &str, text: &str) -> SessionResult<()> {
        self.actions.push(format!("type:{}={}", ref_id, text));
        let page = self
            .current
            .as_mut()
            .ok_or_else(|| SessionError::Backend("no page loaded".to_string()))?;
        match page.elements.iter_mut().find(|e| e.ref_id == ref_id) {
            Some(el) => {
                el.value = text.to_string();
                Ok(())
            }
            None => Err(SessionError::TargetNotFound(ref_id.to_string())),
        }
    }

    async fn upload(&mut self, ref_id: &str, file_path: &str) -> SessionResult<()> {
        self.actions.push(format!("upload:{}={}", ref_id, file_path));
        let exists = self
            .current
            .as_ref()
            .is_some_and(|p| p.elements.iter().any(|e| e.ref_id == ref_id));
        if exists {
            Ok(())
        } else {
            Err(SessionError::TargetNotFound(ref_id.to_string()))
        }
    }

    async fn stop(&mut self) -> SessionResult<()> {
        self.actions.push("stop".to_string());
        self.stopped = true;
        Ok(())
    }
}
