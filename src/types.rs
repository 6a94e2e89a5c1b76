use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub disable_images: bool,
    /// Directory Chrome has been told to place downloads in. Read back by
    /// the download watcher when no explicit directory is given.
    pub download_dir: Option<PathBuf>,
    pub element_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            disable_images: false,
            download_dir: None,
            element_timeout_ms: 10_000,
            navigation_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Loads a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// How a page element is located on screen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::XPath(expression.into())
    }

    /// JavaScript expression resolving this locator to an array of every match.
    pub(crate) fn js_lookup_all(&self) -> String {
        match self {
            Locator::Css(selector) => format!(
                "Array.from(document.querySelectorAll('{}'))",
                js_escape(selector)
            ),
            Locator::XPath(expression) => format!(
                "(function() {{ const result = document.evaluate('{}', document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const nodes = []; for (let i = 0; i < result.snapshotLength; i++) nodes.push(result.snapshotItem(i)); return nodes; }})()",
                js_escape(expression)
            ),
        }
    }

    /// JavaScript expression that resolves this locator to an element or null.
    pub(crate) fn js_lookup(&self) -> String {
        match self {
            Locator::Css(selector) => {
                format!("document.querySelector('{}')", js_escape(selector))
            }
            Locator::XPath(expression) => format!(
                "document.evaluate('{}', document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
                js_escape(expression)
            ),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css '{}'", selector),
            Locator::XPath(expression) => write!(f, "xpath '{}'", expression),
        }
    }
}

pub(crate) fn js_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Wait condition scoped to a located element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementCondition {
    Present,
    Visible,
    Clickable,
}

/// Wait condition evaluated against the driver itself, with no locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCondition {
    UrlContains(String),
    TitleContains(String),
    PageLoaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_ten_second_element_timeout() {
        let config = SessionConfig::default();
        assert!(config.headless);
        assert_eq!(config.element_timeout(), Duration::from_secs(10));
        assert!(config.download_dir.is_none());
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = SessionConfig::default();
        config.download_dir = Some(PathBuf::from("/tmp/downloads"));
        config.user_agent = Some("TestAgent/1.0".into());

        let raw = serde_json::to_string(&config).unwrap();
        let restored: SessionConfig = serde_json::from_str(&raw).unwrap();

        assert_eq!(restored.download_dir, config.download_dir);
        assert_eq!(restored.user_agent, config.user_agent);
        assert_eq!(restored.element_timeout_ms, config.element_timeout_ms);
    }

    #[test]
    fn css_lookup_escapes_single_quotes() {
        let locator = Locator::css("a[title='it\\'s here']");
        let js = locator.js_lookup();
        assert!(js.starts_with("document.querySelector("));
        assert!(!js.contains("querySelector('a[title='"));
    }

    #[test]
    fn xpath_lookup_uses_document_evaluate() {
        let locator = Locator::xpath("//button[@id='go']");
        assert!(locator.js_lookup().contains("document.evaluate"));
        assert_eq!(locator.to_string(), "xpath '//button[@id='go']'");
    }

    #[test]
    fn plural_lookup_matches_every_element() {
        let css = Locator::css("li.result");
        assert!(css.js_lookup_all().contains("querySelectorAll"));

        let xpath = Locator::xpath("//li[@class='result']");
        assert!(xpath.js_lookup_all().contains("ORDERED_NODE_SNAPSHOT_TYPE"));
    }
}
