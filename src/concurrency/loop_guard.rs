//! C9 — Loop Guard: remembers the content hash of every file the orchestrator
//! itself just wrote, so the `styleSheetChanged`/poll-tick echo that follows
//! a patch is recognized and silently absorbed instead of re-diffed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};

#[derive(Clone, Copy)]
struct WriteRecord {
    hash: [u8; 16],
    ts: Instant,
}

fn hash_of(content: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

/// Keys are absolute file paths and `sheet:<StylesheetId>` markers; the
/// orchestrator registers both whenever it writes a patch.
pub struct LoopGuard {
    ttl: Duration,
    writes: Mutex<HashMap<String, WriteRecord>>,
}

impl LoopGuard {
    /// Construct a guard that forgets a write after `ttl` has elapsed.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            writes: Mutex::new(HashMap::new()),
        }
    }

    /// Record that the orchestrator itself just produced `content` under
    /// `key`.
    pub fn register_write(&self, key: &str, content: &str) {
        let mut writes = self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writes.insert(
            key.to_owned(),
            WriteRecord {
                hash: hash_of(content),
                ts: Instant::now(),
            },
        );
    }

    /// True if `content` under `key` matches a write this guard registered
    /// within its TTL — i.e. this is an echo of the orchestrator's own write,
    /// not an externally authored change.
    pub fn should_ignore(&self, key: &str, content: &str) -> bool {
        let mut writes = self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(record) = writes.get(key).copied() else {
            return false;
        };
        if record.ts.elapsed() > self.ttl {
            writes.remove(key);
            return false;
        }
        record.hash == hash_of(content)
    }

    /// Drop every entry past its TTL. Run periodically so a long idle period
    /// doesn't leave stale entries sitting in the map forever.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        let mut writes = self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writes.retain(|_, record| record.ts.elapsed() <= ttl);
    }

    /// Spawn a background task that calls [`Self::sweep`] every `ttl`. The
    /// returned handle should be aborted on shutdown.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.ttl);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                self.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_its_own_echoed_write() {
        let guard = LoopGuard::new(Duration::from_secs(5));
        guard.register_write("/tmp/a.css", ".a { color: red; }");
        assert!(guard.should_ignore("/tmp/a.css", ".a { color: red; }"));
    }

    #[test]
    fn does_not_ignore_different_content() {
        let guard = LoopGuard::new(Duration::from_secs(5));
        guard.register_write("/tmp/a.css", ".a { color: red; }");
        assert!(!guard.should_ignore("/tmp/a.css", ".a { color: blue; }"));
    }

    #[test]
    fn does_not_ignore_unknown_key() {
        let guard = LoopGuard::new(Duration::from_secs(5));
        assert!(!guard.should_ignore("/tmp/never-written.css", "anything"));
    }

    #[tokio::test]
    async fn expires_entries_past_ttl() {
        let guard = LoopGuard::new(Duration::from_millis(10));
        guard.register_write("/tmp/a.css", "x");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!guard.should_ignore("/tmp/a.css", "x"));
    }

    #[test]
    fn sweep_purges_expired_entries() {
        let guard = LoopGuard::new(Duration::from_millis(1));
        guard.register_write("/tmp/a.css", "x");
        std::thread::sleep(Duration::from_millis(10));
        guard.sweep();
        assert!(guard.writes.lock().unwrap().is_empty());
    }
}
