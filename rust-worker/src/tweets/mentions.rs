//! Mention extraction from the notifications page.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, info, warn};

/// A tweet on the notifications page that mentions the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mention {
    pub tweet_id: String,
    pub text: String,
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(selector = css, error = ?e, "mention_selector_invalid");
            None
        }
    }
}

/// Tweets in `html` whose text mentions `@username` (case-insensitive).
///
/// Articles without a status link or a text block are skipped; each tweet id
/// is reported once.
pub fn parse_mentions(html: &str, username: &str) -> Vec<Mention> {
    let (Some(article_sel), Some(link_sel), Some(time_sel), Some(text_sel)) = (
        selector("article[data-testid='tweet']"),
        selector("a[href*='/status/']"),
        selector("time"),
        selector("div[data-testid='tweetText']"),
    ) else {
        return Vec::new();
    };

    let handle = format!("@{}", username.trim_start_matches('@').to_lowercase());
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut mentions = Vec::new();
    let mut articles = 0usize;

    for article in document.select(&article_sel) {
        articles += 1;

        let Some(tweet_id) = article
            .select(&link_sel)
            .find(|a| a.select(&time_sel).next().is_some())
            .and_then(|a| a.value().attr("href"))
            .and_then(extract_tweet_id)
        else {
            debug!("mention_article_without_status_link");
            continue;
        };

        let Some(text) = article.select(&text_sel).next().map(element_text) else {
            continue;
        };

        if text.to_lowercase().contains(&handle) && seen.insert(tweet_id.clone()) {
            mentions.push(Mention { tweet_id, text });
        }
    }

    info!(articles = articles, mentions = mentions.len(), "mentions_parsed");
    mentions
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// The numeric id after `/status/` in a tweet permalink.
pub fn extract_tweet_id(href: &str) -> Option<String> {
    let (_, rest) = href.split_once("/status/")?;
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!id.is_empty()).then_some(id)
}
