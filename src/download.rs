use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::{BrowserError, Result};
use crate::page::Element;

/// Filename suffixes Chrome uses while a download is still being written.
const IN_PROGRESS_SUFFIXES: &[&str] = &["tmp", "crdownload"];

/// Filename substrings marking a partial download.
const IN_PROGRESS_MARKERS: &[&str] = &[".com.google.Chrome."];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Immutable capture of a directory's entries at one instant.
///
/// Two snapshots are comparable by set difference; the BTree ordering keeps
/// the comparison deterministic across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySnapshot {
    entries: BTreeSet<PathBuf>,
}

impl DirectorySnapshot {
    /// Lists the directory once. A directory that is missing or unreadable
    /// is a fatal configuration error, never retried past.
    pub fn capture(dir: &Path) -> Result<Self> {
        let mut entries = BTreeSet::new();
        for entry in std::fs::read_dir(dir)? {
            entries.insert(entry?.path());
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains(path)
    }

    /// Symmetric difference against a later snapshot: entries that appeared
    /// or disappeared between the two captures, in path order.
    pub fn diff(&self, later: &DirectorySnapshot) -> Vec<PathBuf> {
        self.entries
            .symmetric_difference(&later.entries)
            .cloned()
            .collect()
    }
}

/// Watches one directory for the completion of one browser-initiated
/// download, triggered by one action.
///
/// The watcher only reads the filesystem. It shares a single deadline
/// between the "did the download start" and "did it finish" phases, and
/// derives the directory from the element's session when no explicit one is
/// configured. Do not run two watchers against the same directory at once:
/// directory diffing attributes every new entry to the in-flight action.
pub struct DownloadWatcher {
    timeout: Duration,
    poll_interval: Duration,
    directory: Option<PathBuf>,
    in_progress_suffixes: Vec<String>,
    in_progress_markers: Vec<String>,
}

impl Default for DownloadWatcher {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            directory: None,
            in_progress_suffixes: IN_PROGRESS_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            in_progress_markers: IN_PROGRESS_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DownloadWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Explicit download directory. Takes precedence over whatever the
    /// element's session reports.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_in_progress_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.in_progress_suffixes.push(suffix.into());
        self
    }

    /// Wraps `action` with directory observation and returns the finished
    /// file's path. The directory is the configured override if set,
    /// otherwise the one the element's session was configured with; with
    /// neither available this fails with `DownloadFolderUnresolved` before
    /// any polling.
    pub async fn watch<T, Fut>(&self, element: &Element, action: Fut) -> Result<PathBuf>
    where
        Fut: Future<Output = Result<T>>,
    {
        let dir = match &self.directory {
            Some(dir) => dir.clone(),
            None => element
                .session()?
                .download_dir()
                .ok_or(BrowserError::DownloadFolderUnresolved)?,
        };
        self.watch_in(&dir, action).await
    }

    /// Convenience for the common case: click the element and wait for the
    /// resulting download.
    pub async fn watch_click(&self, element: &Element) -> Result<PathBuf> {
        self.watch(element, element.click()).await
    }

    /// Core algorithm against an explicit directory.
    ///
    /// The action future is first polled only after the baseline snapshot is
    /// taken, and its error propagates unchanged; polling never starts when
    /// the action fails. One deadline bounds both phases.
    pub async fn watch_in<T, Fut>(&self, dir: &Path, action: Fut) -> Result<PathBuf>
    where
        Fut: Future<Output = Result<T>>,
    {
        let before = DirectorySnapshot::capture(dir)?;
        let deadline = Instant::now() + self.timeout;
        debug!(
            dir = %dir.display(),
            baseline = before.len(),
            "watching for download"
        );

        action.await?;

        // Phase one: wait for any new entry to show up.
        loop {
            let current = DirectorySnapshot::capture(dir)?;
            if current.len() > before.len() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::DownloadNeverStarted(self.timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        // Phase two: wait for a new entry without an in-progress marker.
        // Rescans from scratch each time, so a file that appeared and was
        // renamed between two polls is still picked up.
        loop {
            let current = DirectorySnapshot::capture(dir)?;
            let finished: Vec<PathBuf> = before
                .diff(&current)
                .into_iter()
                .filter(|path| !self.is_in_progress(path))
                .collect();

            match finished.as_slice() {
                [] => {}
                [path] => {
                    debug!(file = %path.display(), "download finished");
                    return Ok(path.clone());
                }
                many => {
                    warn!(candidates = many.len(), "multiple finished downloads detected");
                    return Err(BrowserError::AmbiguousDownload(many.len()));
                }
            }

            if Instant::now() >= deadline {
                return Err(BrowserError::DownloadDidNotFinish(self.timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn is_in_progress(&self, path: &Path) -> bool {
        let suffix_match = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.in_progress_suffixes.iter().any(|s| s == ext))
            .unwrap_or(false);

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let marker_match = self.in_progress_markers.iter().any(|m| name.contains(m));

        suffix_match || marker_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    use crate::page::Element;
    use crate::testing::FakeSession;

    fn fast_watcher(timeout: Duration) -> DownloadWatcher {
        DownloadWatcher::new()
            .with_timeout(timeout)
            .with_poll_interval(Duration::from_millis(10))
    }

    fn touch(path: &Path) {
        fs::write(path, b"contents").unwrap();
    }

    /// Spawns a task that runs `steps` against the filesystem after a delay.
    fn spawn_after(delay: Duration, steps: impl FnOnce() + Send + 'static) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            steps();
        });
    }

    #[tokio::test]
    async fn returns_path_of_finished_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"));
        touch(&dir.path().join("b.txt"));

        let report = dir.path().join("report.pdf");
        let partial = dir.path().join("report.pdf.crdownload");
        spawn_after(Duration::from_millis(50), {
            let partial = partial.clone();
            move || touch(&partial)
        });
        spawn_after(Duration::from_millis(150), {
            let (partial, report) = (partial, report.clone());
            move || fs::rename(&partial, &report).unwrap()
        });

        let found = fast_watcher(Duration::from_secs(10))
            .watch_in(dir.path(), async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(found, report);
        // Pre-existing contents are untouched.
        assert!(dir.path().join("a.txt").exists());
        assert!(dir.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn never_started_download_errors_after_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();

        let err = fast_watcher(Duration::from_millis(300))
            .watch_in(dir.path(), async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, BrowserError::DownloadNeverStarted(_)));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unfinished_download_errors_at_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("d.crdownload");
        spawn_after(Duration::from_millis(30), move || touch(&partial));

        let err = fast_watcher(Duration::from_millis(300))
            .watch_in(dir.path(), async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, BrowserError::DownloadDidNotFinish(_)));
    }

    #[tokio::test]
    async fn chrome_temp_marker_counts_as_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("x.com.google.Chrome.9Qx2ab");
        spawn_after(Duration::from_millis(30), move || touch(&partial));

        let err = fast_watcher(Duration::from_millis(300))
            .watch_in(dir.path(), async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, BrowserError::DownloadDidNotFinish(_)));
    }

    #[tokio::test]
    async fn file_finished_between_polls_is_still_detected() {
        let dir = tempfile::tempdir().unwrap();
        // No intermediate marker at all: appears already complete.
        let report = dir.path().join("instant.csv");
        spawn_after(Duration::from_millis(30), {
            let report = report.clone();
            move || touch(&report)
        });

        let found = fast_watcher(Duration::from_secs(5))
            .watch_in(dir.path(), async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(found, report);
    }

    #[tokio::test]
    async fn two_finished_candidates_error_instead_of_guessing() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = (dir.path().join("one.pdf"), dir.path().join("two.pdf"));
        spawn_after(Duration::from_millis(30), move || {
            touch(&first);
            touch(&second);
        });

        let err = fast_watcher(Duration::from_secs(5))
            .watch_in(dir.path(), async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, BrowserError::AmbiguousDownload(2)));
    }

    #[tokio::test]
    async fn action_error_propagates_and_skips_polling() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();

        let err = fast_watcher(Duration::from_secs(10))
            .watch_in(dir.path(), async {
                Err::<(), _>(BrowserError::ElementNotFound("#download".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BrowserError::ElementNotFound(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unresolvable_directory_fails_before_polling() {
        let session = Arc::new(FakeSession::new());
        let mut element = Element::css("#download");
        element.attach(session);

        let started = Instant::now();
        let err = fast_watcher(Duration::from_secs(10))
            .watch(&element, async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, BrowserError::DownloadFolderUnresolved));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn explicit_directory_wins_over_session_directory() {
        let session_dir = tempfile::tempdir().unwrap();
        let explicit_dir = tempfile::tempdir().unwrap();

        let session = Arc::new(FakeSession::new().with_download_dir(session_dir.path()));
        let mut element = Element::css("#download");
        element.attach(session);

        let report = explicit_dir.path().join("from-explicit.pdf");
        spawn_after(Duration::from_millis(30), {
            let report = report.clone();
            move || touch(&report)
        });
        // A decoy in the session dir must not be picked up.
        touch(&session_dir.path().join("decoy.pdf"));

        let found = fast_watcher(Duration::from_secs(5))
            .with_directory(explicit_dir.path())
            .watch(&element, async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(found, report);
    }

    #[tokio::test]
    async fn session_directory_is_used_when_no_override_given() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(FakeSession::new().with_download_dir(dir.path()));
        let mut element = Element::css("#download");
        element.attach(session);

        let report = dir.path().join("statement.pdf");
        spawn_after(Duration::from_millis(30), {
            let report = report.clone();
            move || touch(&report)
        });

        let found = fast_watcher(Duration::from_secs(5))
            .watch(&element, async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(found, report);
    }

    #[tokio::test]
    async fn missing_directory_is_a_fatal_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("never-created");

        let err = fast_watcher(Duration::from_secs(5))
            .watch_in(&gone, async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, BrowserError::IoError(_)));
    }

    #[test]
    fn snapshot_diff_is_the_symmetric_difference() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"));
        let before = DirectorySnapshot::capture(dir.path()).unwrap();

        touch(&dir.path().join("b.txt"));
        let after = DirectorySnapshot::capture(dir.path()).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(before.diff(&after), vec![dir.path().join("b.txt")]);
        assert!(after.contains(&dir.path().join("a.txt")));
        assert!(before.diff(&before).is_empty());
    }

    #[test]
    fn in_progress_patterns_cover_suffixes_and_markers() {
        let watcher = DownloadWatcher::new().with_in_progress_suffix("part");
        assert!(watcher.is_in_progress(Path::new("/d/report.pdf.crdownload")));
        assert!(watcher.is_in_progress(Path::new("/d/archive.tmp")));
        assert!(watcher.is_in_progress(Path::new("/d/video.part")));
        assert!(watcher.is_in_progress(Path::new("/d/x.com.google.Chrome.9Qx2ab")));
        assert!(!watcher.is_in_progress(Path::new("/d/report.pdf")));
    }
}
