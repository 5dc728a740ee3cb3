//! Configuration module for environment variable parsing.
//!
//! Every knob of the posting service is read once at startup. Malformed values
//! are logged and replaced by their defaults rather than aborting the process.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Placeholder value shipped in old `.env` templates; treated as "no proxy".
const PROXY_PLACEHOLDER: &str = "proxy_url_if_needed";

/// Login credentials for the automated account.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Account used for posting
    pub credentials: Credentials,

    /// Optional proxy server for the browser
    pub proxy_url: Option<String>,

    /// Run the browser without a window
    pub headless: bool,

    /// Expose the DevTools port for remote debugging
    pub remote_debugging: bool,

    /// Port used when remote debugging is enabled
    pub remote_debugging_port: u16,

    /// Optional pool of user agents to rotate through per launch
    pub user_agent_pool: Option<Vec<String>>,

    /// Origin of the automated site
    pub base_url: String,

    /// Saved cookie jar location
    pub session_file: PathBuf,

    /// Shared verification registry file
    pub verification_store_path: PathBuf,

    /// Directory for challenge screenshots
    pub screenshot_dir: PathBuf,

    /// Optional JSON file overriding locator strategies
    pub selectors_file: Option<PathBuf>,

    /// How long a posting attempt waits for a human to resolve a challenge
    pub verification_timeout_minutes: u64,

    /// Interval between verification status checks
    pub verification_poll_seconds: u64,

    /// Pending verifications older than this are hidden from listings
    pub verification_horizon_minutes: i64,

    // =========================================================================
    // Admin surface
    // =========================================================================

    /// Base URL of the admin web process (links + notification sink)
    pub admin_base_url: String,

    /// Shared secret required on admin mutation routes
    pub admin_api_token: Option<String>,

    /// HMAC key used to sign (and verify) notification posts
    pub notification_signing_key: Option<String>,

    /// Maximum age in seconds for signed notification timestamps
    pub notification_signature_max_age: u64,

    /// Port for the web server to listen on
    pub port: u16,

    // =========================================================================
    // Retry policy
    // =========================================================================

    /// Browser launch attempts before giving up
    pub driver_launch_attempts: u32,

    /// Delay between browser launch attempts
    pub driver_retry_delay_ms: u64,

    /// Posting attempts before raising a posting error
    pub post_attempts: u32,

    /// Delay between posting attempts
    pub post_retry_delay_ms: u64,

    /// Bounded wait for the worker during shutdown
    pub worker_shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            credentials: Credentials::default(),
            proxy_url: None,
            headless: true,
            remote_debugging: false,
            remote_debugging_port: 9222,
            user_agent_pool: None,
            base_url: "https://twitter.com".to_string(),
            session_file: PathBuf::from("data/twitter_session.json"),
            verification_store_path: PathBuf::from("static/verifications.json"),
            screenshot_dir: PathBuf::from("static/screenshots"),
            selectors_file: None,
            verification_timeout_minutes: 30,
            verification_poll_seconds: 10,
            verification_horizon_minutes: 60,
            admin_base_url: "http://localhost:5000".to_string(),
            admin_api_token: None,
            notification_signing_key: None,
            notification_signature_max_age: 300,
            port: 8080,
            driver_launch_attempts: 3,
            driver_retry_delay_ms: 2000,
            post_attempts: 3,
            post_retry_delay_ms: 2000,
            worker_shutdown_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let d = Config::default();

        Config {
            credentials: Credentials {
                username: env::var("TWITTER_USERNAME").unwrap_or_default(),
                password: env::var("TWITTER_PASSWORD").unwrap_or_default(),
                email: env::var("TWITTER_EMAIL").unwrap_or_default(),
            },

            proxy_url: parse_proxy("PROXY_URL"),

            headless: parse_bool("HEADLESS", d.headless),

            remote_debugging: parse_bool("ENABLE_REMOTE_DEBUGGING", d.remote_debugging),

            remote_debugging_port: parse_env("REMOTE_DEBUGGING_PORT", d.remote_debugging_port),

            user_agent_pool: parse_csv("USER_AGENT_POOL"),

            base_url: non_empty("TWITTER_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.base_url),

            session_file: non_empty("SESSION_FILE").map(PathBuf::from).unwrap_or(d.session_file),

            verification_store_path: non_empty("VERIFICATION_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.verification_store_path),

            screenshot_dir: non_empty("SCREENSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.screenshot_dir),

            selectors_file: non_empty("SELECTORS_FILE").map(PathBuf::from),

            verification_timeout_minutes: parse_env(
                "VERIFICATION_TIMEOUT_MINUTES",
                d.verification_timeout_minutes,
            ),

            verification_poll_seconds: parse_env(
                "VERIFICATION_POLL_SECONDS",
                d.verification_poll_seconds,
            ),

            verification_horizon_minutes: parse_env(
                "VERIFICATION_HORIZON_MINUTES",
                d.verification_horizon_minutes,
            ),

            admin_base_url: non_empty("ADMIN_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.admin_base_url),

            admin_api_token: non_empty("ADMIN_API_TOKEN"),

            notification_signing_key: non_empty("NOTIFICATION_SIGNING_KEY"),

            notification_signature_max_age: parse_env(
                "NOTIFICATION_SIGNATURE_MAX_AGE",
                d.notification_signature_max_age,
            ),

            port: parse_env("PORT", d.port),

            driver_launch_attempts: parse_env("DRIVER_LAUNCH_ATTEMPTS", d.driver_launch_attempts)
                .max(1),

            driver_retry_delay_ms: parse_env("DRIVER_RETRY_DELAY_MS", d.driver_retry_delay_ms),

            post_attempts: parse_env("POST_ATTEMPTS", d.post_attempts).max(1),

            post_retry_delay_ms: parse_env("POST_RETRY_DELAY_MS", d.post_retry_delay_ms),

            worker_shutdown_timeout_secs: parse_env(
                "WORKER_SHUTDOWN_TIMEOUT_SECS",
                d.worker_shutdown_timeout_secs,
            ),
        }
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_minutes * 60)
    }

    pub fn verification_poll_interval(&self) -> Duration {
        Duration::from_secs(self.verification_poll_seconds.max(1))
    }

    pub fn verification_horizon(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.verification_horizon_minutes)
    }

    pub fn worker_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_shutdown_timeout_secs)
    }
}

/// Parse a typed value, falling back to `default` when unset or malformed.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    let raw = match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Parse a boolean flag ("true"/"1"/"yes" and "false"/"0"/"no").
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        "" => default,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Read a variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read the proxy URL, ignoring blanks and the template placeholder.
fn parse_proxy(name: &str) -> Option<String> {
    let raw = non_empty(name)?;
    if raw.eq_ignore_ascii_case(PROXY_PLACEHOLDER) {
        return None;
    }
    match url::Url::parse(&raw) {
        Ok(_) => Some(raw),
        Err(e) => {
            warn!(env_var = name, error = %e, "Proxy URL does not parse, passing it through as-is");
            Some(raw)
        }
    }
}
