use std::sync::Arc;
use std::time::Duration;

use browser_pagetools::{
    BrowserSession, DownloadWatcher, Element, Page, PageElements, SessionConfig, SessionHandle,
};
use tracing::info;

struct SampleFiles {
    csv_link: Element,
}

impl PageElements for SampleFiles {
    fn elements_mut(&mut self) -> Vec<&mut Element> {
        vec![&mut self.csv_link]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let download_dir = tempfile::tempdir()?;
    info!(dir = %download_dir.path().display(), "downloads will land here");

    let config = SessionConfig {
        headless: true,
        download_dir: Some(download_dir.path().to_path_buf()),
        ..Default::default()
    };
    let browser = Arc::new(BrowserSession::new(config).await?);
    let session: Arc<dyn SessionHandle> = browser.clone();

    let page = Page::new(
        session,
        Some("https://filesamples.com/formats/csv"),
        SampleFiles {
            csv_link: Element::css("a[href$='.csv']"),
        },
    )?;
    page.open(Duration::from_secs(30)).await?;

    let file = DownloadWatcher::new()
        .with_timeout(Duration::from_secs(30))
        .watch_click(&page.elements.csv_link)
        .await?;

    info!(file = %file.display(), "download complete");

    let screenshot = browser.take_screenshot().await?;
    tokio::fs::write(download_dir.path().join("page.png"), screenshot).await?;
    Ok(())
}
