//! Runtime configuration for the agent.
//!
//! Mirrors the `AgentConfig` struct described in spec §6: argument parsing is
//! an ambient CLI concern, but the struct it produces is what the rest of the
//! pipeline consumes, so it lives here rather than in `main.rs`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::error::FatalError;

/// Ports probed in order when `--chrome-port` is not given.
const PORT_PROBE_ORDER: [u16; 4] = [9222, 9333, 9229, 9230];

/// A single `--map URL_PREFIX=LOCAL_PREFIX` user override, consulted before
/// the built-in URL resolver rules (spec §4.4, step 2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlMapping {
    /// URL prefix to match against a stylesheet's `sourceURL`.
    pub url_prefix: String,
    /// Local filesystem prefix to substitute for `url_prefix`.
    pub local_prefix: PathBuf,
}

impl std::str::FromStr for UrlMapping {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (url_prefix, local_prefix) = raw
            .split_once('=')
            .ok_or_else(|| format!("expected URL_PREFIX=LOCAL_PREFIX, got '{raw}'"))?;
        Ok(Self {
            url_prefix: url_prefix.to_owned(),
            local_prefix: PathBuf::from(local_prefix),
        })
    }
}

/// Command-line arguments, parsed with `clap`.
#[derive(Parser, Debug)]
#[command(
    name = "style-bridge",
    about = "Bridges DevTools style edits back into authored CSS/SCSS source files"
)]
pub struct Cli {
    /// URL prefix used to find the browser tab and to anchor the URL resolver.
    #[arg(long)]
    pub dev_server_base: String,

    /// CDP host.
    #[arg(long, default_value = "localhost")]
    pub chrome_host: String,

    /// CDP port. When omitted, probes 9222, 9333, 9229, 9230 in order.
    #[arg(long)]
    pub chrome_port: Option<u16>,

    /// Project root anchoring all resolvers. Defaults to the current directory.
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// User URL-prefix to local-prefix mapping, e.g. `/static=/www/assets`. Repeatable.
    #[arg(long = "map", value_name = "URL_PREFIX=LOCAL_PREFIX")]
    pub mappings: Vec<UrlMapping>,

    /// Loop-guard TTL in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub loop_guard_ttl_ms: u64,

    /// Emit diagnostic (debug-level) log lines.
    #[arg(long)]
    pub verbose: bool,
}

/// Fully resolved agent configuration, after defaulting and validation.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// URL prefix used both to find the browser tab and to anchor the URL resolver.
    pub dev_server_base: String,
    /// CDP host.
    pub chrome_host: String,
    /// CDP port, already resolved (no further probing needed downstream).
    pub chrome_port: u16,
    /// Absolute project root anchoring all resolvers.
    pub project_root: PathBuf,
    /// User URL-prefix to local-prefix mappings, consulted before built-in rules.
    pub mappings: Vec<UrlMapping>,
    /// Loop-guard TTL.
    pub loop_guard_ttl: Duration,
    /// Whether diagnostic logging is enabled.
    pub verbose: bool,
}

impl AgentConfig {
    /// Build an `AgentConfig` from parsed CLI arguments, defaulting
    /// `project_root` to the current working directory and validating it
    /// exists. Does not probe for an open CDP port — see [`probe_chrome_port`].
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let project_root = match cli.project_root {
            Some(path) => path,
            None => env::current_dir()?,
        };
        if !project_root.is_dir() {
            return Err(FatalError::ProjectRootMissing {
                path: project_root.display().to_string(),
            }
            .into());
        }
        let project_root = project_root.canonicalize().unwrap_or(project_root);

        Ok(Self {
            dev_server_base: cli.dev_server_base,
            chrome_host: cli.chrome_host,
            chrome_port: cli.chrome_port.unwrap_or(0),
            project_root,
            mappings: cli.mappings,
            loop_guard_ttl: Duration::from_millis(cli.loop_guard_ttl_ms),
            verbose: cli.verbose,
        })
    }
}

/// Probe `{9222, 9333, 9229, 9230}` in order for an open CDP endpoint,
/// returning the first port that accepts a TCP connection. If
/// `requested_port` is non-zero, it is used as-is without probing.
pub async fn resolve_chrome_port(host: &str, requested_port: u16) -> anyhow::Result<u16> {
    if requested_port != 0 {
        return Ok(requested_port);
    }
    for &port in &PORT_PROBE_ORDER {
        if tokio::net::TcpStream::connect((host, port)).await.is_ok() {
            return Ok(port);
        }
    }
    Err(FatalError::TransportUnreachable {
        host: host.to_owned(),
        port: PORT_PROBE_ORDER[0],
    }
    .into())
}

/// Resolve a path against the project root if it is not already absolute.
pub fn anchor(root: &Path, rel: &Path) -> PathBuf {
    if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        root.join(rel)
    }
}
