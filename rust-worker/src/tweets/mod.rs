//! Tweet posting and mention scanning against the browser session.

pub mod composer;
pub mod mentions;

pub use composer::{PostError, RetryPolicy, TweetComposer};
pub use mentions::{parse_mentions, Mention};
