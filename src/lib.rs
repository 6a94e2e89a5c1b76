pub mod captcha;
pub mod download;
pub mod errors;
pub mod page;
pub mod session;
pub mod testing;
pub mod types;

pub use captcha::{ImageCaptchaSolver, RecaptchaSolver};
pub use download::{DirectorySnapshot, DownloadWatcher};
pub use errors::{BrowserError, Result};
pub use page::{Element, Page, PageElements};
pub use session::{BrowserSession, SessionHandle};
pub use types::*;
