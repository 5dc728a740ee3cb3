//! Chromium backend over the DevTools protocol.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Element, Handler, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::driver::{LaunchOptions, Launcher};
use super::{BrowserError, BrowserHandle, Locator, SavedCookie};

/// Launches a local Chromium for each session.
#[derive(Debug, Default, Clone)]
pub struct CdpLauncher;

#[async_trait]
impl Launcher for CdpLauncher {
    async fn launch(
        &self,
        options: &LaunchOptions,
    ) -> Result<Arc<dyn BrowserHandle>, BrowserError> {
        let browser = CdpBrowser::launch(options).await?;
        Ok(Arc::new(browser))
    }
}

/// One Chromium process with a single working tab.
pub struct CdpBrowser {
    browser: Mutex<Browser>,
    page: Page,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl CdpBrowser {
    pub async fn launch(options: &LaunchOptions) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(&options.user_data_dir)
            .args(options.chrome_args());

        if !options.headless {
            builder = builder.with_head();
        }

        let config = builder.build().map_err(BrowserError::Launch)?;

        info!(
            headless = options.headless,
            proxy = options.proxy.is_some(),
            profile = %options.user_data_dir.display(),
            "chromium_launching"
        );

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(BrowserError::Launch(format!("failed to open tab: {}", e)));
            }
        };

        info!("chromium_ready");

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            closed,
        })
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        Ok(())
    }

    async fn eval_bool(&self, script: String) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        result
            .into_value::<bool>()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    /// Run `body` with `el` bound to the located element; `body` must return a bool.
    async fn with_element(&self, locator: &Locator, body: &str) -> Result<bool, BrowserError> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; {} }})()",
            lookup_js(locator),
            body
        );
        self.eval_bool(script).await
    }

    async fn element(&self, locator: &Locator) -> Result<Element, BrowserError> {
        self.ensure_open()?;
        let found = match locator {
            Locator::Css(s) => self.page.find_element(s.as_str()).await,
            Locator::Xpath(s) => self.page.find_xpath(s.as_str()).await,
        };
        found.map_err(|_| BrowserError::ElementNotFound(locator.to_string()))
    }
}

#[async_trait]
impl BrowserHandle for CdpBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        debug!(url = url, "chromium_navigate");
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool, BrowserError> {
        self.with_element(
            locator,
            "const r = el.getBoundingClientRect(); \
             const shown = el.offsetParent !== null || r.width > 0 || r.height > 0; \
             const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true'; \
             return shown && enabled;",
        )
        .await
    }

    async fn click(&self, locator: &Locator) -> Result<(), BrowserError> {
        // Script click: overlays on the site intercept synthetic mouse events.
        if self.with_element(locator, "el.click(); return true;").await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }

    async fn clear(&self, locator: &Locator) -> Result<(), BrowserError> {
        let cleared = self
            .with_element(
                locator,
                "el.focus(); \
                 if (el.isContentEditable) { \
                   document.execCommand('selectAll', false, null); \
                   document.execCommand('delete', false, null); \
                 } else if ('value' in el) { \
                   el.value = ''; \
                   el.dispatchEvent(new Event('input', { bubbles: true })); \
                 } \
                 return true;",
            )
            .await?;
        if cleared {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError> {
        let element = self.element(locator).await?;
        element
            .focus()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(())
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError> {
        let element = self.element(locator).await?;
        element
            .press_key("Enter")
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(())
    }

    async fn contains_text(&self, needle: &str) -> Result<bool, BrowserError> {
        let script = format!(
            "(() => !!document.body && document.body.innerText.includes({}))()",
            js_string(needle)
        );
        self.eval_bool(script).await
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn cookies(&self) -> Result<Vec<SavedCookie>, BrowserError> {
        self.ensure_open()?;
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::Cookie(e.to_string()))?;

        Ok(cookies
            .into_iter()
            .map(|c| SavedCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: Some(c.path),
                // Session cookies report -1.
                expiry: (c.expires > 0.0).then_some(c.expires as i64),
                secure: Some(c.secure),
                http_only: Some(c.http_only),
                extra: serde_json::Map::new(),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[SavedCookie]) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let mut params = Vec::with_capacity(cookies.len());

        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone());
            if let Some(path) = &cookie.path {
                builder = builder.path(path.clone());
            }
            if let Some(expiry) = cookie.expiry {
                builder = builder.expires(TimeSinceEpoch::new(expiry as f64));
            }
            if let Some(secure) = cookie.secure {
                builder = builder.secure(secure);
            }
            if let Some(http_only) = cookie.http_only {
                builder = builder.http_only(http_only);
            }

            match builder.build() {
                Ok(param) => params.push(param),
                Err(e) => warn!(cookie = %cookie.name, error = %e, "cookie_skipped"),
            }
        }

        self.page
            .set_cookies(params)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Cookie(e.to_string()))
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut browser = self.browser.lock().await;
        let result = browser.close().await;
        let _ = browser.wait().await;

        if let Ok(mut task) = self.handler_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }

        result
            .map(|_| ())
            .map_err(|e| BrowserError::Launch(format!("close failed: {}", e)))
    }
}

/// Drive the DevTools event loop until the connection drops.
fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!(error = %e, "chromium_handler_event_error");
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

/// Quote a Rust string as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// JavaScript expression evaluating to the element (or null) for a locator.
fn lookup_js(locator: &Locator) -> String {
    match locator {
        Locator::Css(s) => format!("document.querySelector({})", js_string(s)),
        Locator::Xpath(s) => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_string(s)
        ),
    }
}
