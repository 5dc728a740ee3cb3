//! Browser module: the single automation handle and everything that drives it.
//!
//! - [`BrowserHandle`]: object-safe async interface over one browser tab
//! - [`cdp`]: Chromium implementation over the DevTools protocol
//! - [`driver`]: launch-with-retry and forced cleanup of the browser process
//! - [`locator`]: ordered locator strategies and the selector catalogue
//! - [`pacing`]: settle delays between steps

pub mod cdp;
pub mod driver;
pub mod locator;
pub mod pacing;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub use cdp::{CdpBrowser, CdpLauncher};
pub use driver::{DriverError, DriverSettings, LaunchOptions, Launcher, SessionDriver};
pub use locator::{first_visible, Locator, Selectors};
pub use pacing::Pacing;

/// Errors raised by browser operations.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("cookie operation failed: {0}")]
    Cookie(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser session closed")]
    Closed,
}

/// One cookie of a saved session, in the jar format shared with older tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Expiry as integer epoch seconds; fractional values are truncated on load.
    #[serde(
        default,
        deserialize_with = "deserialize_expiry",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, rename = "httpOnly", skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    /// Fields we do not interpret (sameSite, ...) survive a load/save cycle.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f64> = Option::deserialize(deserializer)?;
    Ok(raw.map(|v| v as i64))
}

/// The single browser tab every posting operation runs against.
///
/// Implementations are not required to serialise concurrent callers; the
/// service hands out exclusive leases instead.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Load `url` in the tab.
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Whether the element is present, displayed and enabled.
    async fn is_visible(&self, locator: &Locator) -> Result<bool, BrowserError>;

    async fn click(&self, locator: &Locator) -> Result<(), BrowserError>;

    /// Empty an input or editable region.
    async fn clear(&self, locator: &Locator) -> Result<(), BrowserError>;

    /// Focus the element and type `text` with real key events.
    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError>;

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError>;

    /// Whether the rendered page text contains `needle`.
    async fn contains_text(&self, needle: &str) -> Result<bool, BrowserError>;

    /// Current document HTML.
    async fn page_source(&self) -> Result<String, BrowserError>;

    async fn cookies(&self) -> Result<Vec<SavedCookie>, BrowserError>;

    async fn set_cookies(&self, cookies: &[SavedCookie]) -> Result<(), BrowserError>;

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError>;

    /// Quit the browser. Further calls fail with [`BrowserError::Closed`].
    async fn close(&self) -> Result<(), BrowserError>;
}
