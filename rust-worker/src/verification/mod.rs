//! Human-in-the-loop verification.
//!
//! - [`record`]: the persisted record format
//! - [`registry`]: the shared file-backed registry and code submission
//! - [`watch`]: how a waiting flow learns about state changes
//! - [`handler`]: the challenge wait run by whoever holds the browser

pub mod handler;
pub mod record;
pub mod registry;
pub mod watch;

pub use handler::{ChallengeHandler, ChallengeOutcome};
pub use record::{PendingView, VerificationRecord, VerificationStatus};
pub use registry::{HandleSource, RegistryError, VerificationRegistry};
pub use watch::{PollingWatch, ResolutionWatch};
