//! Posting routines: new tweets and replies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::mentions::{parse_mentions, Mention};
use crate::browser::{first_visible, BrowserError, BrowserHandle, Locator, Pacing, Selectors};
use crate::util::text::{preview, sanitize_text, strip_self_mentions};

#[derive(Debug, Error)]
pub enum PostError {
    #[error("nothing left to post after cleaning the content")]
    EmptyContent,

    #[error("posting failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: BrowserError },
}

/// Retry policy for one posting routine call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Drives the composer on the single browser tab.
pub struct TweetComposer {
    selectors: Arc<Selectors>,
    base_url: String,
    username: String,
    pacing: Pacing,
    retry: RetryPolicy,
}

impl TweetComposer {
    pub fn new(
        selectors: Arc<Selectors>,
        base_url: &str,
        username: &str,
        pacing: Pacing,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            selectors,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            pacing,
            retry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Publish `content` as a new tweet.
    pub async fn post(&self, browser: &dyn BrowserHandle, content: &str) -> Result<(), PostError> {
        let text = sanitize_text(content);
        if text.is_empty() {
            return Err(PostError::EmptyContent);
        }

        info!(preview = %preview(&text, 50), length = text.chars().count(), "tweet_posting");
        self.with_retries("tweet", || self.compose_and_send(browser, &text))
            .await
    }

    /// Reply to the tweet `tweet_id`. Mentions of our own handle are dropped.
    pub async fn reply(
        &self,
        browser: &dyn BrowserHandle,
        tweet_id: &str,
        content: &str,
    ) -> Result<(), PostError> {
        let text = strip_self_mentions(&sanitize_text(content), &self.username);
        if text.is_empty() {
            return Err(PostError::EmptyContent);
        }

        info!(tweet_id = %tweet_id, preview = %preview(&text, 50), "reply_posting");
        self.with_retries("reply", || self.open_reply_and_send(browser, tweet_id, &text))
            .await
    }

    /// Open the notifications view and collect tweets mentioning us.
    pub async fn scan_mentions(
        &self,
        browser: &dyn BrowserHandle,
    ) -> Result<Vec<Mention>, BrowserError> {
        browser.navigate(&self.url("/notifications")).await?;
        Pacing::settle(self.pacing.login_complete).await;
        let html = browser.page_source().await?;
        Ok(parse_mentions(&html, &self.username))
    }

    async fn with_retries<F, Fut>(&self, kind: &'static str, mut attempt_once: F) -> Result<(), PostError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), BrowserError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let started = Instant::now();
        let mut last = None;

        for attempt in 1..=attempts {
            match attempt_once().await {
                Ok(()) => {
                    info!(
                        kind = kind,
                        attempt = attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "post_succeeded"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(kind = kind, attempt = attempt, max_attempts = attempts, error = %e, "post_attempt_failed");
                    last = Some(e);
                    if attempt < attempts {
                        sleep(self.retry.delay).await;
                    }
                }
            }
        }

        let last = last.unwrap_or(BrowserError::Closed);
        error!(kind = kind, attempts = attempts, error = %last, "post_failed");
        Err(PostError::Exhausted { attempts, last })
    }

    async fn require(
        &self,
        browser: &dyn BrowserHandle,
        locators: &[Locator],
        what: &str,
    ) -> Result<Locator, BrowserError> {
        first_visible(browser, locators)
            .await
            .ok_or_else(|| BrowserError::ElementNotFound(what.to_string()))
    }

    async fn fill(&self, browser: &dyn BrowserHandle, input: &Locator, text: &str) -> Result<(), BrowserError> {
        browser.click(input).await?;
        Pacing::settle(self.pacing.step).await;
        browser.clear(input).await?;
        Pacing::settle(self.pacing.step).await;
        browser.type_text(input, text).await?;
        Pacing::settle(self.pacing.step).await;
        Ok(())
    }

    async fn compose_and_send(&self, browser: &dyn BrowserHandle, text: &str) -> Result<(), BrowserError> {
        browser.navigate(&self.url("/home")).await?;
        Pacing::settle(self.pacing.page_load).await;

        let input = self
            .require(browser, &self.selectors.compose_input, "tweet input box")
            .await?;
        self.fill(browser, &input, text).await?;

        let button = self
            .require(browser, &self.selectors.post_button, "post button")
            .await?;
        browser.click(&button).await?;
        Pacing::settle(self.pacing.after_submit).await;
        Ok(())
    }

    async fn open_reply_and_send(
        &self,
        browser: &dyn BrowserHandle,
        tweet_id: &str,
        text: &str,
    ) -> Result<(), BrowserError> {
        browser
            .navigate(&self.url(&format!("/i/web/status/{}", tweet_id)))
            .await?;
        Pacing::settle(self.pacing.page_load).await;

        let reply = self
            .require(browser, &self.selectors.reply_button, "reply button")
            .await?;
        browser.click(&reply).await?;
        Pacing::settle(self.pacing.after_submit).await;

        let input = self
            .require(browser, &self.selectors.reply_input, "reply input")
            .await?;
        self.fill(browser, &input, text).await?;

        let button = self
            .require(browser, &self.selectors.reply_submit, "reply button")
            .await?;
        browser.click(&button).await?;
        Pacing::settle(self.pacing.page_load).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBrowser, Reaction};

    fn composer(attempts: u32, delay: Duration) -> TweetComposer {
        TweetComposer::new(
            Arc::new(Selectors::default()),
            "https://twitter.test",
            "fwog_bot",
            Pacing::immediate(),
            RetryPolicy { attempts, delay },
        )
    }

    #[tokio::test]
    async fn test_post_types_and_clicks() {
        let browser = FakeBrowser::ready_to_post(Duration::ZERO);
        let s = Selectors::default();

        composer(3, Duration::ZERO)
            .post(&browser, "hello world **() drafts")
            .await
            .unwrap();

        assert_eq!(browser.typed_into(&s.compose_input), vec!["hello world"]);
        assert_eq!(browser.click_count(&s.post_button[0]), 1);
        assert_eq!(browser.navigations(), vec!["https://twitter.test/home"]);
    }

    #[tokio::test]
    async fn test_post_retries_exhaust_after_three_attempts() {
        let browser = FakeBrowser::new();
        let started = Instant::now();

        let err = composer(3, Duration::from_millis(20))
            .post(&browser, "never lands")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("after 3 attempts"));
        match err {
            PostError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, BrowserError::ElementNotFound(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(browser.navigations().len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_post_recovers_on_second_attempt() {
        let browser = FakeBrowser::new();
        let s = Selectors::default();
        browser.show(&s.compose_input[0]);
        browser.show(&s.compose_input[1]);
        browser.show(&s.post_button[0]);
        // The first composer re-renders away as soon as it is focused.
        browser.on_action(&s.compose_input[0], Reaction::Hide(s.compose_input[0].clone()));

        composer(3, Duration::ZERO)
            .post(&browser, "second time lucky")
            .await
            .unwrap();

        assert_eq!(browser.navigations().len(), 2);
        assert_eq!(browser.typed_into(&s.compose_input), vec!["second time lucky"]);
        assert_eq!(browser.click_count(&s.post_button[0]), 1);
    }

    #[tokio::test]
    async fn test_empty_content_is_rejected() {
        let browser = FakeBrowser::ready_to_post(Duration::ZERO);
        let err = composer(3, Duration::ZERO).post(&browser, "  🚀 ").await.unwrap_err();
        assert!(matches!(err, PostError::EmptyContent));
        assert!(browser.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_reply_strips_self_mention() {
        let browser = FakeBrowser::new();
        let s = Selectors::default();
        browser.show(&s.reply_button[0]);
        browser.show(&s.reply_input[0]);
        browser.show(&s.reply_submit[0]);

        composer(3, Duration::ZERO)
            .reply(&browser, "1790000000000000001", "@Fwog_Bot thanks for asking")
            .await
            .unwrap();

        assert_eq!(
            browser.navigations(),
            vec!["https://twitter.test/i/web/status/1790000000000000001"]
        );
        assert_eq!(browser.typed_into(&s.reply_input), vec!["thanks for asking"]);
        assert_eq!(browser.click_count(&s.reply_submit[0]), 1);
    }

    #[tokio::test]
    async fn test_scan_mentions_reads_notifications() {
        let browser = FakeBrowser::new();
        browser.set_source(
            r#"<article data-testid="tweet"><a href="/x/status/42"><time>1m</time></a>
               <div data-testid="tweetText">@fwog_bot ping</div></article>"#,
        );

        let mentions = composer(1, Duration::ZERO).scan_mentions(&browser).await.unwrap();

        assert_eq!(browser.navigations(), vec!["https://twitter.test/notifications"]);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].tweet_id, "42");
    }
}
