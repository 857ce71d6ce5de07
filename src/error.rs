//! Error types used at process boundaries.
//!
//! Everything below the orchestrator uses `anyhow::Result` and is logged and
//! absorbed at the call site (see spec §7); only the two startup failures
//! here are fatal and propagate to `main`'s exit code.

use thiserror::Error;

/// Failure that aborts the process with exit code 1.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The CDP endpoint refused the connection outright.
    #[error(
        "could not reach Chrome DevTools at {host}:{port} — is Chrome running with \
         --remote-debugging-port={port}?"
    )]
    TransportUnreachable {
        /// Host the agent attempted to connect to.
        host: String,
        /// Port the agent attempted to connect to.
        port: u16,
    },

    /// No attached target's URL matched the configured prefix.
    #[error(
        "no open tab with a URL starting with '{prefix}' was found; open tabs: {}",
        .seen.join(", ")
    )]
    TargetNotFound {
        /// The URL prefix the agent was looking for.
        prefix: String,
        /// URLs of the tabs that were actually open, for diagnostics.
        seen: Vec<String>,
    },

    /// `project_root` does not exist or is not a directory.
    #[error("project root '{path}' does not exist or is not a directory")]
    ProjectRootMissing {
        /// The path that was checked.
        path: String,
    },
}
