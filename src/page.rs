use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;
use url::Url;

use crate::errors::{BrowserError, Result};
use crate::session::SessionHandle;
use crate::types::{DriverCondition, ElementCondition, Locator};

const TEXT_POLL: Duration = Duration::from_millis(100);

/// A capability object scoped to one logical UI control.
///
/// The session reference is nullable until a [`Page`] attaches it; invoking
/// any capability method before that is a programmer error and fails with
/// `SessionNotAttached` rather than silently doing nothing.
pub struct Element {
    locator: Locator,
    session: Option<Arc<dyn SessionHandle>>,
}

impl Element {
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            session: None,
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::new(Locator::css(selector))
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::new(Locator::xpath(expression))
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Assigns the shared session. Attaching again is a no-op in effect:
    /// the element simply ends up pointing at the same session.
    pub fn attach(&mut self, session: Arc<dyn SessionHandle>) {
        self.session = Some(session);
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Result<&Arc<dyn SessionHandle>> {
        self.session
            .as_ref()
            .ok_or_else(|| BrowserError::SessionNotAttached(self.locator.to_string()))
    }

    /// Waits for presence with the session's default budget, then acts.
    async fn located(&self) -> Result<&Arc<dyn SessionHandle>> {
        let session = self.session()?;
        session
            .wait_for(
                &self.locator,
                ElementCondition::Present,
                session.element_timeout(),
            )
            .await?;
        Ok(session)
    }

    pub async fn click(&self) -> Result<()> {
        let session = self.located().await?;
        session.click(&self.locator).await
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        let session = self.located().await?;
        session.type_text(&self.locator, text).await
    }

    /// Finds the element and clears its value.
    pub async fn clear(&self) -> Result<()> {
        let session = self.located().await?;
        session.clear_input(&self.locator).await
    }

    pub async fn text(&self) -> Result<String> {
        let session = self.located().await?;
        session.element_text(&self.locator).await
    }

    /// Waits for presence, then returns the text of every match in
    /// document order.
    pub async fn texts(&self) -> Result<Vec<String>> {
        let session = self.located().await?;
        session.element_texts(&self.locator).await
    }

    /// Number of elements currently matching the locator; zero is not an
    /// error.
    pub async fn count(&self) -> Result<usize> {
        self.session()?.element_count(&self.locator).await
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<String>> {
        let session = self.located().await?;
        session.element_attribute(&self.locator, name).await
    }

    pub async fn wait_until(&self, condition: ElementCondition, timeout: Duration) -> Result<()> {
        self.session()?
            .wait_for(&self.locator, condition, timeout)
            .await
    }

    /// Finds the element and scrolls it into view.
    pub async fn scroll_into_view(&self) -> Result<()> {
        let session = self.located().await?;
        session.scroll_to(&self.locator).await
    }

    pub async fn save_screenshot(&self, path: &Path) -> Result<()> {
        let session = self.located().await?;
        session.save_element_screenshot(&self.locator, path).await
    }

    /// Waits until the element's text differs from `old_text` and is
    /// non-empty, returning the new text.
    pub async fn wait_text_change(&self, old_text: &str, timeout: Duration) -> Result<String> {
        let session = self.session()?;
        let start_time = Instant::now();

        loop {
            if let Ok(text) = session.element_text(&self.locator).await {
                if !text.is_empty() && text != old_text {
                    return Ok(text);
                }
            }

            if start_time.elapsed() >= timeout {
                return Err(BrowserError::ConditionTimeout(format!(
                    "text of {} did not change within {:?}",
                    self.locator, timeout
                )));
            }

            tokio::time::sleep(TEXT_POLL).await;
        }
    }
}

/// Static registration of a page's elements.
///
/// Concrete pages list their element fields here so [`Page::new`] can hand
/// each one the shared session without any runtime reflection.
pub trait PageElements {
    fn elements_mut(&mut self) -> Vec<&mut Element>;
}

/// Composition root owning the session and a set of declared elements.
///
/// Known limitation: propagation is a construction-time guarantee. An
/// element swapped into `elements` after construction is not attached
/// automatically; call [`Page::attach_elements`] again if you replace one.
pub struct Page<E: PageElements> {
    session: Arc<dyn SessionHandle>,
    url: Option<Url>,
    pub elements: E,
}

impl<E: PageElements> std::fmt::Debug for Page<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("url", &self.url).finish()
    }
}

impl<E: PageElements> Page<E> {
    pub fn new(
        session: Arc<dyn SessionHandle>,
        url: Option<&str>,
        elements: E,
    ) -> Result<Self> {
        let url = url
            .map(Url::parse)
            .transpose()
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        let mut page = Self {
            session,
            url,
            elements,
        };
        page.attach_elements();
        Ok(page)
    }

    /// Hands the page's session to every registered element. Idempotent.
    pub fn attach_elements(&mut self) {
        let session = self.session.clone();
        for element in self.elements.elements_mut() {
            element.attach(session.clone());
        }
    }

    pub fn session(&self) -> &Arc<dyn SessionHandle> {
        &self.session
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Navigates to the page's URL and waits for the document to finish loading.
    pub async fn open(&self, timeout: Duration) -> Result<()> {
        let url = self.url.as_ref().ok_or_else(|| {
            BrowserError::NavigationFailed("page has no URL configured".to_string())
        })?;

        debug!(url = %url, "opening page");
        self.session.navigate(url.as_str()).await?;
        self.session
            .wait_until(DriverCondition::PageLoaded, timeout)
            .await
    }
}
