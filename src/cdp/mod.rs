//! C2 — CDP Session Manager: the long-lived page session (`session`) plus the
//! ephemeral fresh-fetch side-channel the polling loop uses to get text the
//! browser hasn't already cached from a previous fetch (`fresh`).

pub mod fresh;
pub mod session;

pub use session::{SessionEvent, SessionManager};
