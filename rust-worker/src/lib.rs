//! twitterd - single-browser Twitter posting service.
//!
//! This library provides the shared modules for the two binaries:
//! - `twitter-worker`: owns the browser, drains the tweet queue, serves the
//!   admin and posting API
//! - `twitter-admin`: registry-only admin process working on the shared
//!   verification file
//!
//! ## Architecture
//!
//! ```text
//! producers ─▶ TwitterService::submit ─▶ TweetQueue ─▶ worker ─┐
//!                     │ (priority 0)                           ▼
//!                     └──────────────▶ browser lease ─▶ BrowserHandle
//!                                            │
//!              challenge screen ─▶ VerificationRegistry ◀─ admin HTTP
//! ```

pub mod auth;
pub mod browser;
pub mod config;
pub mod notify;
pub mod queue;
pub mod service;
pub mod tweets;
pub mod util;
pub mod verification;
pub mod web;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use notify::{AdminNotifier, Notifier};
pub use queue::{Priority, WorkItem};
pub use service::{BrowserLease, ServiceStatus, TwitterService};
pub use verification::{VerificationRegistry, VerificationStatus};
pub use web::AppState;
