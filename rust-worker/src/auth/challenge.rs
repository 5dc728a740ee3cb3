//! Detection of the "enter the code we sent you" screen and code entry.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::browser::{first_visible, BrowserHandle, Pacing, Selectors};

/// Knows how to recognise the verification challenge and answer it.
#[derive(Debug, Clone)]
pub struct ChallengeScreen {
    selectors: Arc<Selectors>,
    pacing: Pacing,
}

impl ChallengeScreen {
    pub fn new(selectors: Arc<Selectors>, pacing: Pacing) -> Self {
        Self { selectors, pacing }
    }

    /// Whether the page currently asks for a verification code.
    ///
    /// Lookup errors count as "not present".
    pub async fn is_present(&self, browser: &dyn BrowserHandle) -> bool {
        for phrase in &self.selectors.challenge_phrases {
            match browser.contains_text(phrase).await {
                Ok(true) => {
                    info!(phrase = %phrase, "challenge_screen_detected");
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "challenge_screen_check_failed");
                    return false;
                }
            }
        }

        if first_visible(browser, &self.selectors.challenge_marker)
            .await
            .is_some()
        {
            info!("challenge_screen_detected_by_input");
            return true;
        }

        false
    }

    /// Type `code` into the challenge form and submit it.
    ///
    /// Returns true once the challenge screen is gone.
    pub async fn submit_code(&self, browser: &dyn BrowserHandle, code: &str) -> bool {
        let code = code.trim();
        if code.is_empty() {
            error!("challenge_code_empty");
            return false;
        }

        let Some(input) = first_visible(browser, &self.selectors.challenge_code_input).await else {
            error!("challenge_code_input_not_found");
            return false;
        };

        if let Err(e) = browser.clear(&input).await {
            warn!(error = %e, "challenge_code_input_clear_failed");
        }
        if let Err(e) = browser.type_text(&input, code).await {
            error!(error = %e, "challenge_code_type_failed");
            return false;
        }

        let Some(submit) = first_visible(browser, &self.selectors.challenge_submit).await else {
            error!("challenge_submit_not_found");
            return false;
        };

        if let Err(e) = browser.click(&submit).await {
            error!(error = %e, "challenge_submit_click_failed");
            return false;
        }
        info!("challenge_code_submitted");

        Pacing::settle(self.pacing.page_load).await;

        if self.is_present(browser).await {
            error!("challenge_still_present_after_code");
            false
        } else {
            info!("challenge_code_accepted");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Locator;
    use crate::testing::{FakeBrowser, Reaction};

    fn screen() -> (ChallengeScreen, Arc<Selectors>) {
        let selectors = Arc::new(Selectors::default());
        (
            ChallengeScreen::new(Arc::clone(&selectors), Pacing::immediate()),
            selectors,
        )
    }

    /// Challenge page whose submit button clears the challenge.
    fn challenge_page(selectors: &Selectors, accepts: bool) -> FakeBrowser {
        let browser = FakeBrowser::new();
        browser.add_text("Check your email");
        browser.show(&selectors.challenge_code_input[1]);
        browser.show(&selectors.challenge_submit[0]);
        if accepts {
            browser.on_action(
                &selectors.challenge_submit[0],
                Reaction::RemoveText("Check your email".to_string()),
            );
        }
        browser
    }

    #[tokio::test]
    async fn test_detects_by_phrase() {
        let (screen, _) = screen();
        let browser = FakeBrowser::new();
        assert!(!screen.is_present(&browser).await);

        browser.add_text("Wir haben dir einen Bestätigungscode gesendet");
        assert!(screen.is_present(&browser).await);
    }

    #[tokio::test]
    async fn test_detects_by_marker_input() {
        let (screen, selectors) = screen();
        let browser = FakeBrowser::new();
        browser.show(&selectors.challenge_marker[0]);
        assert!(screen.is_present(&browser).await);
    }

    #[tokio::test]
    async fn test_login_field_alone_is_not_a_challenge() {
        let (screen, _) = screen();
        let browser = FakeBrowser::new();
        browser.show(&Locator::css("input[name='text']"));
        assert!(!screen.is_present(&browser).await);
    }

    #[tokio::test]
    async fn test_submit_code_accepted() {
        let (screen, selectors) = screen();
        let browser = challenge_page(&selectors, true);

        assert!(screen.submit_code(&browser, " 123456 ").await);
        assert_eq!(
            browser.typed_into(&selectors.challenge_code_input),
            vec!["123456".to_string()]
        );
        assert_eq!(browser.click_count(&selectors.challenge_submit[0]), 1);
    }

    #[tokio::test]
    async fn test_submit_code_rejected_when_screen_stays() {
        let (screen, selectors) = screen();
        let browser = challenge_page(&selectors, false);
        assert!(!screen.submit_code(&browser, "000000").await);
    }

    #[tokio::test]
    async fn test_submit_empty_code_touches_nothing() {
        let (screen, selectors) = screen();
        let browser = challenge_page(&selectors, true);
        assert!(!screen.submit_code(&browser, "  ").await);
        assert!(browser.typed().is_empty());
    }
}
