use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info};

use crate::errors::{BrowserError, Result};
use crate::types::{DriverCondition, ElementCondition, Locator, SessionConfig};

const CONDITION_POLL: Duration = Duration::from_millis(100);

/// Capability boundary consumed by pages, elements and the download watcher.
///
/// Everything the page-object layer needs from the underlying browser client
/// goes through this trait, so tests can substitute an in-memory fake.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    fn current_url(&self) -> String;

    async fn page_title(&self) -> Result<String>;

    async fn click(&self, locator: &Locator) -> Result<()>;

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<()>;

    async fn clear_input(&self, locator: &Locator) -> Result<()>;

    async fn element_text(&self, locator: &Locator) -> Result<String>;

    /// Texts of every element matching the locator, in document order.
    async fn element_texts(&self, locator: &Locator) -> Result<Vec<String>>;

    /// Number of elements currently matching the locator.
    async fn element_count(&self, locator: &Locator) -> Result<usize>;

    async fn element_attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>>;

    async fn is_present(&self, locator: &Locator) -> Result<bool>;

    async fn is_visible(&self, locator: &Locator) -> Result<bool>;

    /// Waits until a located element satisfies `condition`. Expiry surfaces
    /// as `ElementNotFound`.
    async fn wait_for(
        &self,
        locator: &Locator,
        condition: ElementCondition,
        timeout: Duration,
    ) -> Result<()>;

    /// Waits for a driver-level condition with no locator involved. Expiry
    /// surfaces as `ConditionTimeout`. This is deliberately a separate call
    /// from `wait_for` rather than an overload selected by failure type.
    async fn wait_until(&self, condition: DriverCondition, timeout: Duration) -> Result<()>;

    async fn scroll_to(&self, locator: &Locator) -> Result<()>;

    async fn save_element_screenshot(&self, locator: &Locator, path: &Path) -> Result<()>;

    async fn execute_javascript(&self, script: &str) -> Result<serde_json::Value>;

    /// Download directory this session was configured with, if any.
    fn download_dir(&self) -> Option<PathBuf>;

    /// Default budget for element waits performed implicitly by actions.
    fn element_timeout(&self) -> Duration;
}

pub struct BrowserSession {
    browser: Browser,
    tab: Arc<Tab>,
    config: SessionConfig,
}

impl BrowserSession {
    pub async fn new(config: SessionConfig) -> Result<Self> {
        // Create strings first to ensure they live long enough
        let window_size_arg = format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        );
        let user_agent_arg = config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];

        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }

        if config.disable_images {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .build()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Downloads are opt-in: Chrome only writes into the configured
        // directory after the browser has been told to allow them there.
        if let Some(dir) = &config.download_dir {
            tab.call_method(headless_chrome::protocol::cdp::Browser::SetDownloadBehavior {
                behavior:
                    headless_chrome::protocol::cdp::Browser::SetDownloadBehaviorBehaviorOption::Allow,
                browser_context_id: None,
                download_path: Some(dir.to_string_lossy().into_owned()),
                events_enabled: None,
            })
            .map_err(|e| BrowserError::ChromeError(e.to_string()))?;
            debug!(dir = %dir.display(), "download behavior configured");
        }

        info!(headless = config.headless, "browser session started");

        Ok(Self {
            browser,
            tab,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn take_screenshot(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(
                headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
                None,
                None,
                true,
            )
            .map_err(|e| BrowserError::ScreenshotFailed(e.to_string()))
    }

    pub async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Option<serde_json::Value>> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| BrowserError::JavaScriptFailed(e.to_string()))?;
        Ok(result.value)
    }

    /// Runs a script expected to produce a boolean; anything else reads as false.
    async fn evaluate_bool(&self, script: &str) -> Result<bool> {
        Ok(self
            .evaluate(script)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn condition_met(&self, locator: &Locator, condition: ElementCondition) -> Result<bool> {
        let script = match condition {
            ElementCondition::Present => format!(
                r#"
                (function() {{
                    const element = {};
                    return element !== null && element !== undefined;
                }})()
                "#,
                locator.js_lookup()
            ),
            ElementCondition::Visible => visibility_script(locator, false),
            ElementCondition::Clickable => visibility_script(locator, true),
        };
        self.evaluate_bool(&script).await
    }
}

fn visibility_script(locator: &Locator, require_enabled: bool) -> String {
    format!(
        r#"
        (function() {{
            const element = {};
            if (!element) return false;

            const rect = element.getBoundingClientRect();
            const style = window.getComputedStyle(element);

            const visible = rect.width > 0 &&
                   rect.height > 0 &&
                   style.visibility !== 'hidden' &&
                   style.display !== 'none' &&
                   parseFloat(style.opacity) > 0;
            return visible && (!{} || !element.disabled);
        }})()
        "#,
        locator.js_lookup(),
        require_enabled
    )
}

#[async_trait]
impl SessionHandle for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    async fn page_title(&self) -> Result<String> {
        Ok(self
            .evaluate("document.title")
            .await?
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default())
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        match locator {
            Locator::Css(selector) => {
                self.tab
                    .find_element(selector)
                    .map_err(|e| BrowserError::ElementNotFound(e.to_string()))?
                    .click()
                    .map_err(|e| BrowserError::JavaScriptFailed(e.to_string()))?;
                Ok(())
            }
            Locator::XPath(_) => {
                let script = format!(
                    r#"
                    (function() {{
                        const element = {};
                        if (element) {{
                            element.click();
                            return true;
                        }}
                        return false;
                    }})()
                    "#,
                    locator.js_lookup()
                );

                if self.evaluate_bool(&script).await? {
                    Ok(())
                } else {
                    Err(BrowserError::ElementNotFound(locator.to_string()))
                }
            }
        }
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<()> {
        match locator {
            Locator::Css(selector) => {
                let element = self
                    .tab
                    .find_element(selector)
                    .map_err(|e| BrowserError::ElementNotFound(e.to_string()))?;

                element
                    .click()
                    .map_err(|e| BrowserError::JavaScriptFailed(e.to_string()))?;

                element
                    .type_into(text)
                    .map_err(|e| BrowserError::JavaScriptFailed(e.to_string()))?;

                Ok(())
            }
            Locator::XPath(_) => {
                let script = format!(
                    r#"
                    (function() {{
                        const element = {};
                        if (element) {{
                            element.focus();
                            element.value = '{}';
                            element.dispatchEvent(new Event('input', {{ bubbles: true }}));
                            element.dispatchEvent(new Event('change', {{ bubbles: true }}));
                            return true;
                        }}
                        return false;
                    }})()
                    "#,
                    locator.js_lookup(),
                    crate::types::js_escape(text)
                );

                if self.evaluate_bool(&script).await? {
                    Ok(())
                } else {
                    Err(BrowserError::ElementNotFound(locator.to_string()))
                }
            }
        }
    }

    async fn clear_input(&self, locator: &Locator) -> Result<()> {
        let script = format!(
            r#"
            (function() {{
                const element = {};
                if (element) {{
                    element.value = '';
                    element.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    element.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }}
                return false;
            }})()
            "#,
            locator.js_lookup()
        );

        if self.evaluate_bool(&script).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }

    async fn element_text(&self, locator: &Locator) -> Result<String> {
        let script = format!(
            r#"
            (function() {{
                const element = {};
                if (element) {{
                    return element.textContent || element.innerText || '';
                }}
                return null;
            }})()
            "#,
            locator.js_lookup()
        );

        self.evaluate(&script)
            .await?
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }

    async fn element_texts(&self, locator: &Locator) -> Result<Vec<String>> {
        // Stringified in-page so the array comes back by value.
        let script = format!(
            r#"
            (function() {{
                const nodes = {};
                const texts = [];
                for (const element of nodes) {{
                    texts.push(element.textContent || element.innerText || '');
                }}
                return JSON.stringify(texts);
            }})()
            "#,
            locator.js_lookup_all()
        );

        let raw = self
            .evaluate(&script)
            .await?
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;

        Ok(serde_json::from_str(&raw)?)
    }

    async fn element_count(&self, locator: &Locator) -> Result<usize> {
        let script = format!(
            r#"
            (function() {{
                const nodes = {};
                return nodes.length;
            }})()
            "#,
            locator.js_lookup_all()
        );

        Ok(self
            .evaluate(&script)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize)
    }

    async fn element_attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        // Stringified in-page so the object comes back by value.
        let script = format!(
            r#"
            (function() {{
                const element = {};
                if (!element) return null;
                return JSON.stringify({{ value: element.getAttribute('{}') }});
            }})()
            "#,
            locator.js_lookup(),
            crate::types::js_escape(name)
        );

        let raw = self
            .evaluate(&script)
            .await?
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;

        let fields: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(fields
            .get("value")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool> {
        self.condition_met(locator, ElementCondition::Present).await
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        self.condition_met(locator, ElementCondition::Visible).await
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        condition: ElementCondition,
        timeout: Duration,
    ) -> Result<()> {
        let start_time = Instant::now();

        loop {
            if self.condition_met(locator, condition).await? {
                return Ok(());
            }

            if start_time.elapsed() >= timeout {
                return Err(BrowserError::ElementNotFound(format!(
                    "{} not {:?} within {:?}",
                    locator, condition, timeout
                )));
            }

            tokio::time::sleep(CONDITION_POLL).await;
        }
    }

    async fn wait_until(&self, condition: DriverCondition, timeout: Duration) -> Result<()> {
        let start_time = Instant::now();

        loop {
            let met = match &condition {
                DriverCondition::UrlContains(fragment) => self.tab.get_url().contains(fragment),
                DriverCondition::TitleContains(fragment) => {
                    self.page_title().await?.contains(fragment)
                }
                DriverCondition::PageLoaded => {
                    self.evaluate_bool("document.readyState === 'complete'").await?
                }
            };

            if met {
                return Ok(());
            }

            if start_time.elapsed() >= timeout {
                return Err(BrowserError::ConditionTimeout(format!(
                    "{:?} not met within {:?}",
                    condition, timeout
                )));
            }

            tokio::time::sleep(CONDITION_POLL).await;
        }
    }

    async fn scroll_to(&self, locator: &Locator) -> Result<()> {
        let script = format!(
            r#"
            (function() {{
                const element = {};
                if (element) {{
                    element.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
                    return true;
                }}
                return false;
            }})()
            "#,
            locator.js_lookup()
        );

        if self.evaluate_bool(&script).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }

    async fn save_element_screenshot(&self, locator: &Locator, path: &Path) -> Result<()> {
        self.scroll_to(locator).await?;
        tokio::time::sleep(CONDITION_POLL).await;

        // Capture the element itself, not the whole tab: solvers get an
        // image cropped to the control they are asked about.
        let element = match locator {
            Locator::Css(selector) => self.tab.find_element(selector),
            Locator::XPath(expression) => self.tab.find_element_by_xpath(expression),
        }
        .map_err(|e| BrowserError::ElementNotFound(e.to_string()))?;

        let screenshot = element
            .capture_screenshot(
                headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
            )
            .map_err(|e| BrowserError::ScreenshotFailed(e.to_string()))?;

        tokio::fs::write(path, screenshot)
            .await
            .map_err(BrowserError::IoError)?;

        Ok(())
    }

    async fn execute_javascript(&self, script: &str) -> Result<serde_json::Value> {
        Ok(self.evaluate(script).await?.unwrap_or(serde_json::Value::Null))
    }

    fn download_dir(&self) -> Option<PathBuf> {
        self.config.download_dir.clone()
    }

    fn element_timeout(&self) -> Duration {
        self.config.element_timeout()
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Browser process is torn down when the handle drops, on every exit path.
    }
}
