//! CAPTCHA breaking built on opaque solver hooks.
//!
//! The solving itself is an external service; these helpers only move the
//! evidence (a screenshot, a sitekey) to the solver and put its answer back
//! into the page. Solvers are never validated or retried here.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::{BrowserError, Result};
use crate::page::Element;
use crate::session::SessionHandle;

/// Solves an image CAPTCHA given a screenshot on disk.
#[async_trait]
pub trait ImageCaptchaSolver: Send + Sync {
    async fn solve(&self, image_path: &Path) -> anyhow::Result<String>;
}

/// Solves a reCAPTCHA given its sitekey and the page URL, returning the token.
#[async_trait]
pub trait RecaptchaSolver: Send + Sync {
    async fn solve(&self, site_key: &str, page_url: &str) -> anyhow::Result<String>;
}

/// Screenshots the CAPTCHA element to a temporary PNG, hands the file to the
/// solver, and optionally types the answer into `write_into`. The temporary
/// file is removed when this returns, on success or error.
pub async fn break_image_captcha(
    captcha: &Element,
    solver: &dyn ImageCaptchaSolver,
    write_into: Option<&Element>,
) -> Result<String> {
    let image = tempfile::Builder::new()
        .prefix("captcha-")
        .suffix(".png")
        .tempfile()?;

    captcha.save_screenshot(image.path()).await?;
    let answer = solver
        .solve(image.path())
        .await
        .map_err(BrowserError::from)?;
    debug!("image captcha solved");

    if let Some(target) = write_into {
        target.type_text(&answer).await?;
    }
    Ok(answer)
}

/// Reads the widget's `data-sitekey`, solves against the current page URL,
/// and injects the token into the `g-recaptcha-response` field.
pub async fn break_recaptcha(widget: &Element, solver: &dyn RecaptchaSolver) -> Result<String> {
    let site_key = widget.attribute("data-sitekey").await?.ok_or_else(|| {
        BrowserError::ElementNotFound(format!("{} has no data-sitekey", widget.locator()))
    })?;
    break_recaptcha_with_key(widget.session()?.as_ref(), solver, &site_key).await
}

/// Variant for pages that hide the sitekey away from the widget markup.
pub async fn break_recaptcha_with_key(
    session: &dyn SessionHandle,
    solver: &dyn RecaptchaSolver,
    site_key: &str,
) -> Result<String> {
    let page_url = session.current_url();
    let token = solver
        .solve(site_key, &page_url)
        .await
        .map_err(BrowserError::from)?;

    session
        .execute_javascript(&format!(
            "document.getElementsByClassName('g-recaptcha-response')[0].innerHTML = '{}';",
            crate::types::js_escape(&token)
        ))
        .await?;
    debug!("recaptcha token injected");
    Ok(token)
}
