//! Browser session driver: launch with retry, close with forced cleanup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{BrowserError, BrowserHandle};
use crate::config::Config;
use crate::util::user_agent::pick_user_agent;

static LAUNCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors surfaced by [`SessionDriver`].
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser launch failed after {attempts} attempts: {last}")]
    LaunchExhausted { attempts: u32, last: String },
}

/// Everything needed to start one browser process.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub proxy: Option<String>,
    pub remote_debugging_port: Option<u16>,
    pub user_agent: Option<String>,
    /// Per-launch profile directory; its path also identifies the process.
    pub user_data_dir: PathBuf,
}

impl LaunchOptions {
    /// Extra command-line switches for Chromium.
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = vec![
            "--start-maximized".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--log-level=3".to_string(),
        ];

        if let Some(port) = self.remote_debugging_port {
            args.push(format!("--remote-debugging-port={}", port));
            args.push("--remote-debugging-address=0.0.0.0".to_string());
        }

        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={}", proxy));
        }

        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={}", ua));
        }

        args
    }

    /// Command-line marker used to find this browser's processes.
    pub fn process_marker(&self) -> String {
        format!("--user-data-dir={}", self.user_data_dir.display())
    }
}

/// Builds browser handles. The service takes one so tests can inject a double.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions)
        -> Result<Arc<dyn BrowserHandle>, BrowserError>;
}

/// Launch and retry policy for the session driver.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub headless: bool,
    pub proxy: Option<String>,
    pub remote_debugging_port: Option<u16>,
    pub user_agent_pool: Option<Vec<String>>,
    /// Parent directory for per-launch profiles
    pub profile_root: PathBuf,
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl DriverSettings {
    pub fn from_config(config: &Config, proxy_override: Option<String>) -> Self {
        Self {
            headless: config.headless,
            proxy: proxy_override.or_else(|| config.proxy_url.clone()),
            remote_debugging_port: config
                .remote_debugging
                .then_some(config.remote_debugging_port),
            user_agent_pool: config.user_agent_pool.clone(),
            profile_root: std::env::temp_dir(),
            attempts: config.driver_launch_attempts,
            retry_delay: Duration::from_millis(config.driver_retry_delay_ms),
        }
    }
}

/// Owns the one browser handle of the process.
pub struct SessionDriver {
    launcher: Arc<dyn Launcher>,
    settings: DriverSettings,
    handle: Option<Arc<dyn BrowserHandle>>,
    options: Option<LaunchOptions>,
}

impl SessionDriver {
    pub fn new(launcher: Arc<dyn Launcher>, settings: DriverSettings) -> Self {
        Self {
            launcher,
            settings,
            handle: None,
            options: None,
        }
    }

    pub fn handle(&self) -> Option<Arc<dyn BrowserHandle>> {
        self.handle.clone()
    }

    /// Marker of the running browser's processes, for a forced kill.
    pub fn process_marker(&self) -> Option<String> {
        self.options.as_ref().map(LaunchOptions::process_marker)
    }

    /// Start the browser, retrying with a fixed backoff.
    ///
    /// A failed attempt force-kills whatever the launch left behind before
    /// the next one starts.
    pub async fn initialize_driver(&mut self) -> Result<Arc<dyn BrowserHandle>, DriverError> {
        if let Some(handle) = &self.handle {
            return Ok(Arc::clone(handle));
        }

        let attempts = self.settings.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let options = self.next_launch_options();

            info!(attempt = attempt, max_attempts = attempts, "driver_launch_attempt");

            match self.launcher.launch(&options).await {
                Ok(handle) => {
                    info!(attempt = attempt, "driver_launched");
                    self.handle = Some(Arc::clone(&handle));
                    self.options = Some(options);
                    return Ok(handle);
                }
                Err(e) => {
                    error!(attempt = attempt, max_attempts = attempts, error = %e, "driver_launch_failed");
                    last_error = e.to_string();
                    cleanup_after_launch(&options);

                    if attempt < attempts {
                        sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        Err(DriverError::LaunchExhausted {
            attempts,
            last: last_error,
        })
    }

    /// Quit the browser; if that fails, kill its processes by marker.
    ///
    /// Safe to call repeatedly.
    pub async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let options = self.options.take();

        match handle.close().await {
            Ok(()) => info!("driver_closed"),
            Err(e) => {
                error!(error = %e, "driver_close_failed");
                if let Some(options) = &options {
                    let killed = force_kill_by_marker(&options.process_marker());
                    if killed == 0 {
                        warn!("driver_force_kill_found_nothing");
                    }
                }
            }
        }

        if let Some(options) = options {
            remove_profile_dir(&options.user_data_dir);
        }
    }

    fn next_launch_options(&self) -> LaunchOptions {
        let n = LAUNCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir_name = format!("twitterd-profile-{}-{}", std::process::id(), n);

        LaunchOptions {
            headless: self.settings.headless,
            proxy: self.settings.proxy.clone(),
            remote_debugging_port: self.settings.remote_debugging_port,
            user_agent: Some(pick_user_agent(self.settings.user_agent_pool.as_deref())),
            user_data_dir: self.settings.profile_root.join(dir_name),
        }
    }
}

/// Kill any process left by a failed launch and drop its profile.
fn cleanup_after_launch(options: &LaunchOptions) {
    force_kill_by_marker(&options.process_marker());
    remove_profile_dir(&options.user_data_dir);
}

fn remove_profile_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "profile_dir_remove_failed");
        }
    }
}

/// Kill every process whose command line contains `marker`. Returns the count.
pub fn force_kill_by_marker(marker: &str) -> usize {
    use sysinfo::{ProcessesToUpdate, System};

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut killed = 0usize;
    for (pid, process) in sys.processes() {
        let cmd_line = process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        if cmd_line.contains(marker) && process.kill() {
            info!(pid = pid.as_u32(), "browser_process_killed");
            killed += 1;
        }
    }

    killed
}
