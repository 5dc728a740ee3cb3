//! Test doubles shared by unit tests across modules.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{BrowserError, BrowserHandle, LaunchOptions, Launcher, Locator, SavedCookie};
use crate::notify::Notifier;

/// Change applied to the fake page when an element is clicked or Enter is pressed on it.
#[derive(Debug, Clone)]
pub enum Reaction {
    Show(Locator),
    Hide(Locator),
    AddText(String),
    RemoveText(String),
}

#[derive(Default)]
struct PageState {
    visible: HashSet<Locator>,
    texts: Vec<String>,
    source: String,
    cookies: Vec<SavedCookie>,
    reactions: HashMap<Locator, Vec<Reaction>>,
    typed: Vec<(Locator, String)>,
    clicks: Vec<Locator>,
    enters: Vec<Locator>,
    navigations: Vec<String>,
    screenshots: Vec<String>,
    closed: bool,
    close_count: usize,
    fail_close: bool,
}

/// In-memory browser that records every interaction.
///
/// Each operation sleeps for `op_delay` while counted as active, so tests can
/// assert that no two operations ever overlapped.
pub struct FakeBrowser {
    state: Mutex<PageState>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    op_delay: Duration,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(op_delay: Duration) -> Self {
        Self {
            state: Mutex::new(PageState::default()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            op_delay,
        }
    }

    /// A page where the composer and post button are present and logged in.
    pub fn ready_to_post(op_delay: Duration) -> Self {
        let browser = Self::with_delay(op_delay);
        let selectors = crate::browser::Selectors::default();
        browser.show(&selectors.compose_input[0]);
        browser.show(&selectors.post_button[0]);
        browser
    }

    pub fn show(&self, locator: &Locator) {
        self.state.lock().unwrap().visible.insert(locator.clone());
    }

    pub fn hide(&self, locator: &Locator) {
        self.state.lock().unwrap().visible.remove(locator);
    }

    pub fn add_text(&self, text: &str) {
        self.state.lock().unwrap().texts.push(text.to_string());
    }

    pub fn set_source(&self, html: &str) {
        self.state.lock().unwrap().source = html.to_string();
    }

    pub fn set_cookies_raw(&self, cookies: Vec<SavedCookie>) {
        self.state.lock().unwrap().cookies = cookies;
    }

    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    pub fn on_action(&self, locator: &Locator, reaction: Reaction) {
        self.state
            .lock()
            .unwrap()
            .reactions
            .entry(locator.clone())
            .or_default()
            .push(reaction);
    }

    pub fn typed(&self) -> Vec<(Locator, String)> {
        self.state.lock().unwrap().typed.clone()
    }

    /// Text typed into any of `locators`, in order.
    pub fn typed_into(&self, locators: &[Locator]) -> Vec<String> {
        self.typed()
            .into_iter()
            .filter(|(l, _)| locators.contains(l))
            .map(|(_, t)| t)
            .collect()
    }

    pub fn clicks(&self) -> Vec<Locator> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn click_count(&self, locator: &Locator) -> usize {
        self.clicks().iter().filter(|l| *l == locator).count()
    }

    pub fn enters(&self) -> Vec<Locator> {
        self.state.lock().unwrap().enters.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn screenshots(&self) -> Vec<String> {
        self.state.lock().unwrap().screenshots.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    pub fn max_concurrent_ops(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<ActiveGuard<'_>, BrowserError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let guard = ActiveGuard(&self.active);
        if !self.op_delay.is_zero() {
            tokio::time::sleep(self.op_delay).await;
        }
        if self.state.lock().unwrap().closed {
            return Err(BrowserError::Closed);
        }
        Ok(guard)
    }

    fn react(state: &mut PageState, locator: &Locator) {
        let reactions = state.reactions.get(locator).cloned().unwrap_or_default();
        for reaction in reactions {
            match reaction {
                Reaction::Show(l) => {
                    state.visible.insert(l);
                }
                Reaction::Hide(l) => {
                    state.visible.remove(&l);
                }
                Reaction::AddText(t) => state.texts.push(t),
                Reaction::RemoveText(t) => state.texts.retain(|x| *x != t),
            }
        }
    }

    fn require(state: &PageState, locator: &Locator) -> Result<(), BrowserError> {
        if state.visible.contains(locator) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let _g = self.enter().await?;
        self.state.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool, BrowserError> {
        let _g = self.enter().await?;
        Ok(self.state.lock().unwrap().visible.contains(locator))
    }

    async fn click(&self, locator: &Locator) -> Result<(), BrowserError> {
        let _g = self.enter().await?;
        let mut state = self.state.lock().unwrap();
        Self::require(&state, locator)?;
        state.clicks.push(locator.clone());
        Self::react(&mut state, locator);
        Ok(())
    }

    async fn clear(&self, locator: &Locator) -> Result<(), BrowserError> {
        let _g = self.enter().await?;
        let state = self.state.lock().unwrap();
        Self::require(&state, locator)
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError> {
        let _g = self.enter().await?;
        let mut state = self.state.lock().unwrap();
        Self::require(&state, locator)?;
        state.typed.push((locator.clone(), text.to_string()));
        Ok(())
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError> {
        let _g = self.enter().await?;
        let mut state = self.state.lock().unwrap();
        Self::require(&state, locator)?;
        state.enters.push(locator.clone());
        Self::react(&mut state, locator);
        Ok(())
    }

    async fn contains_text(&self, needle: &str) -> Result<bool, BrowserError> {
        let _g = self.enter().await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .texts
            .iter()
            .any(|t| t.contains(needle)))
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        let _g = self.enter().await?;
        Ok(self.state.lock().unwrap().source.clone())
    }

    async fn cookies(&self) -> Result<Vec<SavedCookie>, BrowserError> {
        let _g = self.enter().await?;
        Ok(self.state.lock().unwrap().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[SavedCookie]) -> Result<(), BrowserError> {
        let _g = self.enter().await?;
        self.state
            .lock()
            .unwrap()
            .cookies
            .extend(cookies.iter().cloned());
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        let _g = self.enter().await?;
        std::fs::write(path, b"png").map_err(|e| BrowserError::Screenshot(e.to_string()))?;
        self.state
            .lock()
            .unwrap()
            .screenshots
            .push(path.display().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.close_count += 1;
        state.closed = true;
        if state.fail_close {
            return Err(BrowserError::Launch("close failed".to_string()));
        }
        Ok(())
    }
}

/// Launcher handing out [`FakeBrowser`]s, optionally failing the first launches.
pub struct FakeLauncher {
    fail_first: usize,
    launches: AtomicUsize,
    template: Mutex<Option<Arc<FakeBrowser>>>,
    last_options: Mutex<Option<LaunchOptions>>,
    last_browser: Mutex<Option<Arc<FakeBrowser>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            launches: AtomicUsize::new(0),
            template: Mutex::new(None),
            last_options: Mutex::new(None),
            last_browser: Mutex::new(None),
        }
    }

    /// Every successful launch returns this browser.
    pub fn with_browser(browser: Arc<FakeBrowser>) -> Self {
        Self::new().serving(browser)
    }

    pub fn serving(self, browser: Arc<FakeBrowser>) -> Self {
        *self.template.lock().unwrap() = Some(browser);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<LaunchOptions> {
        self.last_options.lock().unwrap().clone()
    }

    pub fn last_browser(&self) -> Option<Arc<FakeBrowser>> {
        self.last_browser.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(
        &self,
        options: &LaunchOptions,
    ) -> Result<Arc<dyn BrowserHandle>, BrowserError> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        if n < self.fail_first {
            return Err(BrowserError::Launch(format!("launch {} refused", n + 1)));
        }

        let browser = self
            .template
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Arc::new(FakeBrowser::new()));
        *self.last_browser.lock().unwrap() = Some(Arc::clone(&browser));
        Ok(browser)
    }
}

/// Notifier that remembers every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn urgent(&self, message: &str) -> bool {
        self.messages.lock().unwrap().push(message.to_string());
        true
    }
}
