//! Test doubles and helpers for page-object and watcher tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{BrowserError, Result};
use crate::session::{BrowserSession, SessionHandle};
use crate::types::{DriverCondition, ElementCondition, Locator, SessionConfig};

pub struct TestHelper;

impl TestHelper {
    /// Headless real-browser session for end-to-end checks and demos.
    pub async fn create_test_session() -> Result<BrowserSession> {
        let config = SessionConfig {
            headless: true,
            ..Default::default()
        };
        BrowserSession::new(config).await
    }
}

/// In-memory [`SessionHandle`] for exercising pages, elements and the
/// download watcher without a browser.
///
/// Element presence, texts and attributes are scripted up front; clicks,
/// typed text and executed scripts are recorded for assertions.
pub struct FakeSession {
    download_dir: Option<PathBuf>,
    url: Mutex<String>,
    title: String,
    present: Mutex<HashSet<Locator>>,
    texts: Mutex<HashMap<Locator, String>>,
    texts_all: Mutex<HashMap<Locator, Vec<String>>>,
    attributes: Mutex<HashMap<(Locator, String), String>>,
    clicks: Mutex<Vec<Locator>>,
    typed: Mutex<Vec<(Locator, String)>>,
    cleared: Mutex<Vec<Locator>>,
    executed: Mutex<Vec<String>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            download_dir: None,
            url: Mutex::new("https://example.test/".to_string()),
            title: "fake page".to_string(),
            present: Mutex::new(HashSet::new()),
            texts: Mutex::new(HashMap::new()),
            texts_all: Mutex::new(HashMap::new()),
            attributes: Mutex::new(HashMap::new()),
            clicks: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            cleared: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn add_present(&self, locator: Locator) {
        self.present.lock().unwrap().insert(locator);
    }

    pub fn set_text(&self, locator: Locator, text: impl Into<String>) {
        self.texts.lock().unwrap().insert(locator, text.into());
    }

    pub fn set_texts(&self, locator: Locator, texts: Vec<String>) {
        self.texts_all.lock().unwrap().insert(locator, texts);
    }

    pub fn set_attribute(
        &self,
        locator: Locator,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.attributes
            .lock()
            .unwrap()
            .insert((locator, name.into()), value.into());
    }

    pub fn clicks(&self) -> Vec<Locator> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn typed(&self) -> Vec<(Locator, String)> {
        self.typed.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> Vec<Locator> {
        self.cleared.lock().unwrap().clone()
    }

    pub fn executed_scripts(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn require_present(&self, locator: &Locator) -> Result<()> {
        if self.present.lock().unwrap().contains(locator) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionHandle for FakeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    fn current_url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    async fn page_title(&self) -> Result<String> {
        Ok(self.title.clone())
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        self.require_present(locator)?;
        self.clicks.lock().unwrap().push(locator.clone());
        Ok(())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<()> {
        self.require_present(locator)?;
        self.typed
            .lock()
            .unwrap()
            .push((locator.clone(), text.to_string()));
        Ok(())
    }

    async fn clear_input(&self, locator: &Locator) -> Result<()> {
        self.require_present(locator)?;
        self.cleared.lock().unwrap().push(locator.clone());
        Ok(())
    }

    async fn element_text(&self, locator: &Locator) -> Result<String> {
        self.texts
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }

    async fn element_texts(&self, locator: &Locator) -> Result<Vec<String>> {
        if let Some(texts) = self.texts_all.lock().unwrap().get(locator) {
            return Ok(texts.clone());
        }
        self.element_text(locator).await.map(|text| vec![text])
    }

    async fn element_count(&self, locator: &Locator) -> Result<usize> {
        if let Some(texts) = self.texts_all.lock().unwrap().get(locator) {
            return Ok(texts.len());
        }
        Ok(usize::from(self.present.lock().unwrap().contains(locator)))
    }

    async fn element_attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        self.require_present(locator)?;
        Ok(self
            .attributes
            .lock()
            .unwrap()
            .get(&(locator.clone(), name.to_string()))
            .cloned())
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool> {
        Ok(self.present.lock().unwrap().contains(locator))
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        self.is_present(locator).await
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        _condition: ElementCondition,
        _timeout: Duration,
    ) -> Result<()> {
        self.require_present(locator)
    }

    async fn wait_until(&self, _condition: DriverCondition, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn scroll_to(&self, locator: &Locator) -> Result<()> {
        self.require_present(locator)
    }

    async fn save_element_screenshot(&self, locator: &Locator, path: &Path) -> Result<()> {
        self.require_present(locator)?;
        // Tagged with the locator so tests can assert the capture was
        // scoped to the requested element rather than the whole page.
        tokio::fs::write(path, format!("element capture: {}", locator))
            .await
            .map_err(BrowserError::IoError)
    }

    async fn execute_javascript(&self, script: &str) -> Result<serde_json::Value> {
        self.executed.lock().unwrap().push(script.to_string());
        Ok(serde_json::Value::Null)
    }

    fn download_dir(&self) -> Option<PathBuf> {
        self.download_dir.clone()
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_millis(200)
    }
}
