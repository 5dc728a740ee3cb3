//! Authentication against the automated site.
//!
//! A saved cookie jar is tried first; the interactive form (username, an
//! optional e-mail re-confirmation, password) is the fallback. Challenge
//! screens asking for an e-mailed code are not handled here: callers detect
//! them with [`ChallengeScreen`] and run the verification flow.

pub mod challenge;
pub mod cookies;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::browser::{first_visible, BrowserHandle, Pacing, Selectors};
use crate::config::Credentials;

pub use challenge::ChallengeScreen;
pub use cookies::CookieJar;

/// Logs the single browser session in and out.
pub struct Authenticator {
    credentials: Credentials,
    jar: CookieJar,
    selectors: Arc<Selectors>,
    challenge: ChallengeScreen,
    base_url: String,
    pacing: Pacing,
}

impl Authenticator {
    pub fn new(
        credentials: Credentials,
        jar: CookieJar,
        selectors: Arc<Selectors>,
        base_url: &str,
        pacing: Pacing,
    ) -> Self {
        Self {
            credentials,
            jar,
            challenge: ChallengeScreen::new(Arc::clone(&selectors), pacing),
            selectors,
            base_url: base_url.trim_end_matches('/').to_string(),
            pacing,
        }
    }

    pub fn challenge(&self) -> &ChallengeScreen {
        &self.challenge
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Whether an authenticated-only element is on the page.
    pub async fn is_logged_in(&self, browser: &dyn BrowserHandle) -> bool {
        first_visible(browser, &self.selectors.logged_in_marker)
            .await
            .is_some()
    }

    /// Restore the saved cookie jar and check that it still logs us in.
    ///
    /// A jar that no longer works is deleted.
    pub async fn load_session(&self, browser: &dyn BrowserHandle) -> bool {
        let Some(cookies) = self.jar.load() else {
            return false;
        };

        info!(cookies = cookies.len(), "session_restore_starting");

        let restored = async {
            browser.navigate(&self.base_url).await?;
            browser.set_cookies(&cookies).await?;
            browser.navigate(&self.url("/home")).await
        }
        .await;

        if let Err(e) = restored {
            warn!(error = %e, "session_restore_failed");
            self.jar.delete();
            return false;
        }

        Pacing::settle(self.pacing.page_load).await;

        if self.is_logged_in(browser).await {
            info!("session_restored");
            true
        } else {
            warn!("session_restore_not_logged_in");
            self.jar.delete();
            false
        }
    }

    /// Log in, preferring the saved session. Saves a fresh jar on success.
    pub async fn login(&self, browser: &dyn BrowserHandle) -> bool {
        if self.load_session(browser).await {
            return true;
        }

        info!(username = %self.credentials.username, "login_starting");

        if let Err(e) = browser.navigate(&self.url("/login")).await {
            error!(error = %e, "login_navigation_failed");
            return false;
        }
        Pacing::settle(self.pacing.page_load).await;

        let Some(username_field) = first_visible(browser, &self.selectors.login_username).await
        else {
            error!("login_username_field_not_found");
            return false;
        };
        let entered = async {
            browser
                .type_text(&username_field, &self.credentials.username)
                .await?;
            browser.press_enter(&username_field).await
        }
        .await;
        if let Err(e) = entered {
            error!(error = %e, "login_username_entry_failed");
            return false;
        }
        Pacing::settle(self.pacing.after_submit).await;

        self.handle_email_interstitial(browser).await;

        let Some(password_field) = first_visible(browser, &self.selectors.login_password).await
        else {
            error!("login_password_field_not_found");
            return false;
        };
        let entered = async {
            browser
                .type_text(&password_field, &self.credentials.password)
                .await?;
            browser.press_enter(&password_field).await
        }
        .await;
        if let Err(e) = entered {
            error!(error = %e, "login_password_entry_failed");
            return false;
        }
        Pacing::settle(self.pacing.login_complete).await;

        self.handle_email_interstitial(browser).await;

        if self.is_logged_in(browser).await {
            info!("login_succeeded");
            self.save_session(browser).await;
            true
        } else {
            error!("login_failed_no_logged_in_marker");
            false
        }
    }

    /// Answer the "confirm your e-mail or phone" step if it is showing.
    ///
    /// Returns whether the interstitial was detected. Failures are logged and
    /// the login flow continues.
    pub async fn handle_email_interstitial(&self, browser: &dyn BrowserHandle) -> bool {
        if !self.email_interstitial_present(browser).await {
            return false;
        }

        let Some(input) = first_visible(browser, &self.selectors.email_input).await else {
            warn!("email_interstitial_input_not_found");
            return true;
        };

        if let Err(e) = browser.clear(&input).await {
            warn!(error = %e, "email_interstitial_clear_failed");
        }
        if let Err(e) = browser.type_text(&input, &self.credentials.email).await {
            warn!(error = %e, "email_interstitial_type_failed");
            return true;
        }
        info!("email_interstitial_filled");

        let advanced = match first_visible(browser, &self.selectors.email_next_button).await {
            Some(button) => browser.click(&button).await,
            None => {
                info!("email_interstitial_next_not_found_pressing_enter");
                browser.press_enter(&input).await
            }
        };
        if let Err(e) = advanced {
            warn!(error = %e, "email_interstitial_submit_failed");
        }

        Pacing::settle(self.pacing.page_load).await;
        true
    }

    async fn email_interstitial_present(&self, browser: &dyn BrowserHandle) -> bool {
        for phrase in &self.selectors.email_prompt_phrases {
            if let Ok(true) = browser.contains_text(phrase).await {
                info!(phrase = %phrase, "email_interstitial_detected");
                return true;
            }
        }

        if first_visible(browser, &self.selectors.email_prompt_marker)
            .await
            .is_some()
        {
            info!("email_interstitial_detected_by_input");
            return true;
        }

        false
    }

    /// Re-check login once a verification challenge has been resolved.
    pub async fn complete_login_after_verification(&self, browser: &dyn BrowserHandle) -> bool {
        Pacing::settle(self.pacing.page_load).await;

        if self.is_logged_in(browser).await {
            info!("login_completed_after_verification");
            self.save_session(browser).await;
            return true;
        }

        if let Err(e) = browser.navigate(&self.url("/home")).await {
            error!(error = %e, "post_verification_navigation_failed");
            return false;
        }
        Pacing::settle(self.pacing.page_load).await;

        if self.is_logged_in(browser).await {
            info!("login_completed_after_verification");
            self.save_session(browser).await;
            true
        } else {
            error!("login_incomplete_after_verification");
            false
        }
    }

    /// Persist the browser's current cookies. Failures are logged.
    pub async fn save_session(&self, browser: &dyn BrowserHandle) -> bool {
        let cookies = match browser.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                error!(error = %e, "session_cookies_read_failed");
                return false;
            }
        };

        match self.jar.save(&cookies) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.jar.path().display(), error = %e, "session_save_failed");
                false
            }
        }
    }

    /// Log out through the confirmation sheet and forget the saved session.
    pub async fn logout(&self, browser: &dyn BrowserHandle) -> bool {
        if let Err(e) = browser.navigate(&self.url("/logout")).await {
            error!(error = %e, "logout_navigation_failed");
            return false;
        }
        Pacing::settle(self.pacing.after_submit).await;

        let Some(confirm) = first_visible(browser, &self.selectors.logout_confirm).await else {
            error!("logout_confirm_not_found");
            return false;
        };
        if let Err(e) = browser.click(&confirm).await {
            error!(error = %e, "logout_confirm_failed");
            return false;
        }
        Pacing::settle(self.pacing.page_load).await;

        self.jar.delete();
        info!("logged_out");
        true
    }
}
