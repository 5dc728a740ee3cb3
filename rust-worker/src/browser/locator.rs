//! Locator strategies and the selector catalogue.
//!
//! The automated site changes its markup without notice, so every element we
//! need is described by an ordered list of locators; the first one that
//! matches a displayed element wins. The lists are data: defaults live here
//! and a JSON file can override any of them.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::BrowserHandle;

/// A rule for finding one element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "selector", rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    Xpath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(selector: impl Into<String>) -> Self {
        Locator::Xpath(selector.into())
    }

    pub fn selector(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::Xpath(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::Xpath(s) => write!(f, "xpath:{}", s),
        }
    }
}

/// Try each locator in order and return the first that resolves to a visible element.
///
/// Lookup errors on one strategy are logged and the next one is tried.
pub async fn first_visible(
    browser: &dyn BrowserHandle,
    locators: &[Locator],
) -> Option<Locator> {
    for locator in locators {
        match browser.is_visible(locator).await {
            Ok(true) => {
                debug!(locator = %locator, "locator_matched");
                return Some(locator.clone());
            }
            Ok(false) => {
                debug!(locator = %locator, "locator_no_match");
            }
            Err(e) => {
                debug!(locator = %locator, error = %e, "locator_lookup_failed");
            }
        }
    }
    None
}

/// Every locator list and detection phrase the service uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// Composer text area on the home timeline
    pub compose_input: Vec<Locator>,
    /// Button that publishes the composed post
    pub post_button: Vec<Locator>,
    /// Element only rendered for an authenticated session
    pub logged_in_marker: Vec<Locator>,
    pub login_username: Vec<Locator>,
    pub login_password: Vec<Locator>,
    /// Phrases shown when the site asks to re-confirm the account e-mail
    pub email_prompt_phrases: Vec<String>,
    /// Input that identifies the e-mail interstitial on its own
    pub email_prompt_marker: Vec<Locator>,
    pub email_input: Vec<Locator>,
    pub email_next_button: Vec<Locator>,
    /// Phrases shown on the "enter the code we sent you" challenge
    pub challenge_phrases: Vec<String>,
    /// Element that identifies the challenge screen on its own
    pub challenge_marker: Vec<Locator>,
    pub challenge_code_input: Vec<Locator>,
    pub challenge_submit: Vec<Locator>,
    pub reply_button: Vec<Locator>,
    pub reply_input: Vec<Locator>,
    pub reply_submit: Vec<Locator>,
    pub logout_confirm: Vec<Locator>,
}

impl Default for Selectors {
    fn default() -> Self {
        Selectors {
            compose_input: vec![
                Locator::xpath("//div[@aria-label='Post text']"),
                Locator::xpath("//div[@aria-label='Tweet text']"),
                Locator::css("div[aria-label='Post text']"),
                Locator::css("div[data-testid='tweetTextarea_0']"),
                Locator::css("div[role='textbox'][aria-label='Post text']"),
            ],
            post_button: vec![
                Locator::css("[data-testid='tweetButton']"),
                Locator::css("div[role='button'][data-testid='tweetButtonInline']"),
                Locator::css("button[data-testid='tweetButtonInline']"),
                Locator::css("[data-testid='tweetButtonInline']"),
            ],
            logged_in_marker: vec![
                Locator::xpath("//div[@aria-label='Post text']"),
                Locator::css("div[data-testid='tweetTextarea_0']"),
            ],
            login_username: vec![
                Locator::css("input[name='text']"),
                Locator::css("input[autocomplete='username']"),
            ],
            login_password: vec![
                Locator::css("input[name='password']"),
                Locator::css("input[type='password']"),
            ],
            email_prompt_phrases: vec![
                "Gib deine Telefonnummer oder E-Mail-Adresse ein".to_string(),
                "Enter your phone number or email address".to_string(),
                "Hilf uns, deinen Account sicher zu halten".to_string(),
                "Verifiziere deine Identität".to_string(),
            ],
            email_prompt_marker: vec![Locator::css("input[data-testid='ocfEnterTextTextInput']")],
            email_input: vec![
                Locator::css("input[name='text']"),
                Locator::css("input[data-testid='ocfEnterTextTextInput']"),
            ],
            email_next_button: vec![
                Locator::css("button[data-testid='ocfEnterTextNextButton']"),
                Locator::xpath("//button[@role='button']//span[contains(text(), 'Weiter')]/.."),
                Locator::xpath("//button[@role='button']//span[contains(text(), 'Next')]/.."),
            ],
            challenge_phrases: vec![
                "Sieh in deiner E-Mail nach".to_string(),
                "Check your email".to_string(),
                "Bestätigungscode".to_string(),
                "verification code".to_string(),
            ],
            challenge_marker: vec![Locator::xpath(
                "//input[contains(@placeholder, 'code') or contains(@placeholder, 'Code')]",
            )],
            challenge_code_input: vec![
                Locator::xpath(
                    "//input[contains(@placeholder, 'code') or contains(@placeholder, 'Code')]",
                ),
                Locator::css("input[name='text']"),
            ],
            challenge_submit: vec![
                Locator::css("button[type='submit']"),
                Locator::css("button[data-testid='ocfEnterTextNextButton']"),
                Locator::xpath("//button[.//span[contains(text(), 'Next')]]"),
                Locator::xpath("//button[.//span[contains(text(), 'Verify')]]"),
                Locator::xpath("//button[.//span[contains(text(), 'Submit')]]"),
                Locator::xpath("//button[.//span[contains(text(), 'Weiter')]]"),
            ],
            reply_button: vec![Locator::css("[data-testid='reply']")],
            reply_input: vec![
                Locator::css("div[data-testid='tweetTextarea_0']"),
                Locator::xpath("//div[@aria-label='Post text']"),
            ],
            reply_submit: vec![
                Locator::css("[data-testid='tweetButton']"),
                Locator::css("[data-testid='tweetButtonInline']"),
            ],
            logout_confirm: vec![Locator::css("[data-testid='confirmationSheetConfirm']")],
        }
    }
}

impl Selectors {
    /// Load overrides from a JSON file, keeping defaults for missing lists.
    ///
    /// An unreadable or malformed file is logged and the defaults are used.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Selectors::default();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "selectors_file_unreadable");
                return Selectors::default();
            }
        };

        match serde_json::from_str::<Selectors>(&raw) {
            Ok(selectors) => {
                info!(path = %path.display(), "selectors_file_loaded");
                selectors
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "selectors_file_invalid");
                Selectors::default()
            }
        }
    }
}
