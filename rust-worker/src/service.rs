//! The posting service: one browser session, one queue, one worker.
//!
//! [`TwitterService`] is built once by the process entry point and shared by
//! reference. It owns the browser lease: every operation that touches the
//! browser (queued posts, immediate posts, mention scans, challenge checks,
//! explicit [`TwitterService::lease`] calls) holds the same async mutex for
//! its whole duration, so no two of them ever overlap.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::Authenticator;
use crate::browser::driver::force_kill_by_marker;
use crate::browser::{
    BrowserHandle, DriverSettings, Launcher, Pacing, Selectors, SessionDriver,
};
use crate::config::Config;
use crate::notify::Notifier;
use crate::queue::{
    run_worker, ItemExecutor, ItemState, Priority, QueueStats, TweetQueue, WorkItem,
};
use crate::tweets::{Mention, RetryPolicy, TweetComposer};
use crate::util::text::preview;
use crate::verification::{
    ChallengeHandler, ChallengeOutcome, HandleSource, PollingWatch, VerificationRegistry,
};

/// Delays the service waits on. Production values come from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct ServiceTimings {
    pub pacing: Pacing,
    pub verification_timeout: Duration,
    pub verification_poll: Duration,
}

impl ServiceTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pacing: Pacing::default(),
            verification_timeout: config.verification_timeout(),
            verification_poll: config.verification_poll_interval(),
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    driver: Option<SessionDriver>,
}

impl SessionSlot {
    fn browser(&self) -> Option<Arc<dyn BrowserHandle>> {
        self.driver.as_ref().and_then(SessionDriver::handle)
    }
}

/// The running browser, reachable without the lease so a stuck lease holder
/// cannot keep it alive past shutdown.
struct LiveBrowser {
    handle: Arc<dyn BrowserHandle>,
    marker: Option<String>,
}

impl LiveBrowser {
    async fn shut_down(self) {
        if let Err(e) = self.handle.close().await {
            error!(error = %e, "browser_close_failed");
            if let Some(marker) = &self.marker {
                force_kill_by_marker(marker);
            }
        }
    }
}

/// Everything that runs under the browser lease.
struct Session {
    slot: tokio::sync::Mutex<SessionSlot>,
    auth: Authenticator,
    composer: TweetComposer,
    challenges: ChallengeHandler,
}

impl Session {
    /// Log in, answering a challenge if one blocks the login.
    async fn sign_in(&self, browser: &Arc<dyn BrowserHandle>) -> bool {
        if self.auth.login(browser.as_ref()).await {
            return true;
        }

        match self.challenges.handle(browser.as_ref()).await {
            ChallengeOutcome::NotPresent => false,
            outcome if outcome.may_proceed() => {
                self.auth
                    .complete_login_after_verification(browser.as_ref())
                    .await
            }
            outcome => {
                warn!(outcome = ?outcome, "login_verification_unresolved");
                false
            }
        }
    }

    /// Clear any challenge, then post. The caller holds the lease.
    async fn post_item(&self, browser: &Arc<dyn BrowserHandle>, item: &WorkItem) -> ItemState {
        match self.challenges.handle(browser.as_ref()).await {
            ChallengeOutcome::NotPresent | ChallengeOutcome::Resolved { .. } => {}
            ChallengeOutcome::TimedOut { id } => {
                return ItemState::Abandoned(format!("verification {} timed out", id));
            }
            ChallengeOutcome::Cancelled { id } => {
                return ItemState::Abandoned(format!("verification {} cancelled", id));
            }
        }

        let result = match &item.reply_to {
            Some(tweet_id) => {
                self.composer
                    .reply(browser.as_ref(), tweet_id, &item.content)
                    .await
            }
            None => self.composer.post(browser.as_ref(), &item.content).await,
        };

        match result {
            Ok(()) => ItemState::Posted,
            Err(e) => ItemState::Failed(e.to_string()),
        }
    }
}

#[async_trait]
impl ItemExecutor for Session {
    async fn execute(&self, item: &WorkItem) -> ItemState {
        let slot = self.slot.lock().await;
        let Some(browser) = slot.browser() else {
            return ItemState::Failed("browser session is not running".to_string());
        };
        self.post_item(&browser, item).await
    }
}

/// Exclusive access to the browser session.
///
/// Handles obtained from [`BrowserLease::browser`] must not be used after the
/// lease is dropped.
pub struct BrowserLease<'a> {
    slot: MutexGuard<'a, SessionSlot>,
    session: &'a Session,
}

impl BrowserLease<'_> {
    /// `None` until the service is initialized.
    pub fn browser(&self) -> Option<Arc<dyn BrowserHandle>> {
        self.slot.browser()
    }

    pub fn composer(&self) -> &TweetComposer {
        &self.session.composer
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.session.auth
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub worker_running: bool,
    pub queue: QueueStats,
}

pub struct TwitterService {
    config: Arc<Config>,
    launcher: Arc<dyn Launcher>,
    registry: Arc<VerificationRegistry>,
    session: Arc<Session>,
    queue: Arc<TweetQueue>,
    /// Serialises initialize and close
    lifecycle: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    /// Set by close; only an explicit initialize clears it
    closed: AtomicBool,
    live: Mutex<Option<LiveBrowser>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_starts: AtomicUsize,
}

impl TwitterService {
    pub fn new(
        config: Arc<Config>,
        launcher: Arc<dyn Launcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let timings = ServiceTimings::from_config(&config);
        Self::with_timings(config, launcher, notifier, timings)
    }

    pub fn with_timings(
        config: Arc<Config>,
        launcher: Arc<dyn Launcher>,
        notifier: Arc<dyn Notifier>,
        timings: ServiceTimings,
    ) -> Arc<Self> {
        let selectors = Arc::new(Selectors::load(config.selectors_file.as_deref()));
        let auth = Authenticator::new(
            config.credentials.clone(),
            crate::auth::CookieJar::new(&config.session_file),
            Arc::clone(&selectors),
            &config.base_url,
            timings.pacing,
        );
        let composer = TweetComposer::new(
            Arc::clone(&selectors),
            &config.base_url,
            &config.credentials.username,
            timings.pacing,
            RetryPolicy {
                attempts: config.post_attempts,
                delay: Duration::from_millis(config.post_retry_delay_ms),
            },
        );
        let challenge = auth.challenge().clone();
        let registry = Arc::new(
            VerificationRegistry::open(&config.verification_store_path, challenge.clone())
                .with_horizon(config.verification_horizon()),
        );
        let challenges = ChallengeHandler::new(
            Arc::clone(&registry),
            notifier,
            Arc::new(PollingWatch::new(Arc::clone(&registry))),
            challenge,
            config.screenshot_dir.clone(),
            &config.admin_base_url,
            timings.verification_timeout,
            timings.verification_poll,
        );

        let service = Arc::new(Self {
            config,
            launcher,
            registry,
            session: Arc::new(Session {
                slot: tokio::sync::Mutex::new(SessionSlot::default()),
                auth,
                composer,
                challenges,
            }),
            queue: Arc::new(TweetQueue::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            live: Mutex::new(None),
            worker: Mutex::new(None),
            worker_starts: AtomicUsize::new(0),
        });

        let source: Arc<dyn HandleSource> = service.clone();
        service.registry.set_handle_source(Arc::downgrade(&source));
        service
    }

    pub fn registry(&self) -> &Arc<VerificationRegistry> {
        &self.registry
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Launch the browser, log in and start the worker.
    ///
    /// Returns immediately when already initialized. A call made while another
    /// one is running waits for it and reports its result instead of starting
    /// a second browser.
    pub async fn initialize(&self, proxy: Option<String>) -> bool {
        self.start(proxy, true).await
    }

    /// `explicit` is false for the lazy start done by a submit, which must
    /// not bring the browser back after [`close`](Self::close).
    async fn start(&self, proxy: Option<String>, explicit: bool) -> bool {
        if self.is_initialized() {
            return true;
        }

        let _lifecycle = match self.lifecycle.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("service_initialize_in_progress_waiting");
                self.lifecycle.lock().await
            }
        };
        if self.is_initialized() {
            return true;
        }
        if explicit {
            self.closed.store(false, Ordering::SeqCst);
        } else if self.closed.load(Ordering::SeqCst) {
            warn!("service_closed_lazy_start_refused");
            return false;
        }

        info!(proxy = proxy.is_some(), "service_initializing");

        let mut slot = self.session.slot.lock().await;
        let settings = DriverSettings::from_config(&self.config, proxy);
        let mut driver = SessionDriver::new(Arc::clone(&self.launcher), settings);

        let browser = match driver.initialize_driver().await {
            Ok(browser) => browser,
            Err(e) => {
                error!(error = %e, "service_initialize_failed");
                return false;
            }
        };

        if !self.session.sign_in(&browser).await {
            error!("service_login_failed");
            driver.close().await;
            return false;
        }

        if let Ok(mut live) = self.live.lock() {
            *live = Some(LiveBrowser {
                handle: Arc::clone(&browser),
                marker: driver.process_marker(),
            });
        }
        slot.driver = Some(driver);
        drop(slot);

        self.queue.reopen();
        self.start_worker();
        self.initialized.store(true, Ordering::SeqCst);
        info!("service_initialized");
        true
    }

    fn start_worker(&self) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let executor: Arc<dyn ItemExecutor> = self.session.clone();
        *worker = Some(tokio::spawn(run_worker(Arc::clone(&self.queue), executor)));
        self.worker_starts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn worker_running(&self) -> bool {
        self.worker
            .lock()
            .map(|worker| worker.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Post a new tweet.
    ///
    /// Priority 0 posts right away under the lease and reports whether it
    /// went out. Any other priority is queued and reports whether it was
    /// accepted.
    pub async fn submit(&self, content: &str, priority: Priority, source: &str) -> bool {
        self.submit_item(WorkItem::new(content, priority, source))
            .await
    }

    /// Reply to `tweet_id`, with the same priority rules as [`submit`](Self::submit).
    pub async fn submit_reply(
        &self,
        tweet_id: &str,
        content: &str,
        priority: Priority,
        source: &str,
    ) -> bool {
        self.submit_item(WorkItem::reply(tweet_id, content, priority, source))
            .await
    }

    async fn submit_item(&self, item: WorkItem) -> bool {
        if !self.is_initialized() && !self.start(None, false).await {
            error!(source = %item.source, "submit_rejected_not_initialized");
            return false;
        }

        if !item.priority.is_immediate() {
            return self.queue.push(item).is_some();
        }

        info!(
            source = %item.source,
            kind = item.kind(),
            preview = %preview(&item.content, 40),
            "immediate_post_starting"
        );
        let ticket = self.queue.record_inline(&item);
        let state = self.session.execute(&item).await;
        let posted = state == ItemState::Posted;
        if let ItemState::Failed(reason) | ItemState::Abandoned(reason) = &state {
            error!(source = %item.source, reason = %reason, "immediate_post_failed");
        }
        self.queue.finish(ticket, state);
        posted
    }

    /// Take the browser lease. Waits for whatever holds it now.
    pub async fn lease(&self) -> BrowserLease<'_> {
        BrowserLease {
            slot: self.session.slot.lock().await,
            session: &self.session,
        }
    }

    /// Tweets on the notifications view that mention us. Empty on any failure.
    pub async fn check_mentions(&self) -> Vec<Mention> {
        let lease = self.lease().await;
        let Some(browser) = lease.browser() else {
            warn!("mention_scan_skipped_not_initialized");
            return Vec::new();
        };

        match lease.composer().scan_mentions(browser.as_ref()).await {
            Ok(mentions) => {
                info!(count = mentions.len(), "mention_scan_completed");
                mentions
            }
            Err(e) => {
                error!(error = %e, "mention_scan_failed");
                Vec::new()
            }
        }
    }

    pub async fn logout(&self) -> bool {
        let lease = self.lease().await;
        match lease.browser() {
            Some(browser) => lease.authenticator().logout(browser.as_ref()).await,
            None => false,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            initialized: self.is_initialized(),
            worker_running: self.worker_running(),
            queue: self.queue.stats(),
        }
    }

    /// Stop the worker, then close the browser. Safe to call repeatedly; a
    /// later [`initialize`](Self::initialize) starts everything again, a
    /// later submit does not.
    ///
    /// Queued items are drained before the worker exits. The worker join and
    /// the wait for the browser lease are each bounded by the configured
    /// shutdown timeout; past it the item in progress is dropped and the
    /// browser is closed from under whoever holds the lease.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _lifecycle = self.lifecycle.lock().await;
        self.initialized.store(false, Ordering::SeqCst);
        self.queue.close();

        let limit = self.config.worker_shutdown_timeout();
        let worker = self
            .worker
            .lock()
            .map(|mut worker| worker.take())
            .unwrap_or(None);
        if let Some(mut handle) = worker {
            match tokio::time::timeout(limit, &mut handle).await {
                Ok(_) => info!("worker_joined"),
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "worker_join_timed_out");
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        let live = self.live.lock().map(|mut live| live.take()).unwrap_or(None);
        match tokio::time::timeout(limit, self.session.slot.lock()).await {
            Ok(mut slot) => {
                if let Some(mut driver) = slot.driver.take() {
                    driver.close().await;
                }
            }
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "browser_lease_busy_at_close");
                if let Some(live) = live {
                    live.shut_down().await;
                }
            }
        }
        info!("service_closed");
    }
}

#[async_trait]
impl HandleSource for TwitterService {
    /// Apply a code with the live browser, but only when nobody holds the lease.
    async fn apply_code(&self, code: &str) -> Option<bool> {
        let slot = self.session.slot.try_lock().ok()?;
        let browser = slot.browser()?;
        Some(
            self.session
                .auth
                .challenge()
                .submit_code(browser.as_ref(), code)
                .await,
        )
    }
}
