//! C10 — Orchestrator: the event-driven-plus-polling pipeline that turns a
//! `styleSheetAdded`/`styleSheetChanged` notification (or a poll-tick content
//! mismatch) into a patch against an authored source file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::{interval, sleep};

use crate::cdp::fresh::{self, FreshStylesheet};
use crate::cdp::session::{SessionEvent, SessionManager};
use crate::concurrency::file_queue::FileQueue;
use crate::concurrency::loop_guard::LoopGuard;
use crate::config::AgentConfig;
use crate::css::differ::{self, DeclarationChange};
use crate::css::patcher;
use crate::registry::{PreferredSource, Registry};
use crate::resolve::selector_resolver::SelectorResolver;
use crate::resolve::sourcemap::{self, SourceMapCache};
use crate::resolve::url_resolver;

/// How long the agent waits after `Page.reload` before trusting that every
/// stylesheet has re-announced itself via `styleSheetAdded`.
const POST_RELOAD_SETTLE: Duration = Duration::from_secs(3);
/// Poll-tick cadence for sheets that only ever get polled, never pushed
/// (e.g. a stylesheet edited through a mechanism that doesn't fire
/// `styleSheetChanged` reliably).
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const PREFIX_LEN: usize = 100;

fn content_key(text: &str) -> String {
    text.chars().take(PREFIX_LEN).collect::<String>().trim().to_owned()
}

fn sheet_key(id: &str) -> String {
    format!("sheet:{id}")
}

/// Pick the fresh-session entry that corresponds to a tracked sheet's
/// previous text: first by content-key match, falling back to equal byte
/// length when no content key matches (spec §4.10's poll-tick step).
fn find_fresh_match<'a>(old_text: Option<&str>, fresh_sheets: &'a [FreshStylesheet]) -> Option<&'a FreshStylesheet> {
    let old_text = old_text?;
    let key = content_key(old_text);
    fresh_sheets
        .iter()
        .find(|sheet| sheet.content_key == key)
        .or_else(|| fresh_sheets.iter().find(|sheet| sheet.text.len() == old_text.len()))
}

fn is_vanished_stylesheet_error(err: &anyhow::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("no stylesheet") || message.contains("not found")
}

/// C10 — owns every other component and drives the main loop.
pub struct Orchestrator {
    config: AgentConfig,
    registry: Registry,
    loop_guard: Arc<LoopGuard>,
    file_queue: FileQueue,
    source_maps: SourceMapCache,
    selector_resolver: SelectorResolver,
}

impl Orchestrator {
    /// Run the agent to completion: connect, settle after reload, detect
    /// bundler-specific stylesheet mappings, then loop on CDP events and
    /// poll ticks until the session ends or the process receives a shutdown
    /// signal.
    pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
        let mut session =
            SessionManager::connect(&config.chrome_host, config.chrome_port, &config.dev_server_base).await?;

        let mut orchestrator = Self {
            loop_guard: Arc::new(LoopGuard::new(config.loop_guard_ttl)),
            file_queue: FileQueue::new(),
            source_maps: SourceMapCache::new(),
            selector_resolver: SelectorResolver::new(),
            registry: Registry::new(),
            config,
        };

        orchestrator.registry.clear();
        session.reload_page().await?;
        sleep(POST_RELOAD_SETTLE).await;

        orchestrator.detect_vite_stylesheets(&session).await;
        orchestrator.detect_webpack_stylesheets();

        let sweeper = Arc::clone(&orchestrator.loop_guard).spawn_sweeper();

        let mut poll_timer = interval(POLL_INTERVAL);
        poll_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll_timer.tick().await; // first tick fires immediately; don't poll before settling

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    break;
                }
                maybe_event = session.next_event() => {
                    match maybe_event {
                        Some(SessionEvent::Added(id, header)) => {
                            orchestrator.on_stylesheet_added(&session, id, header).await;
                        }
                        Some(SessionEvent::Changed(id)) => {
                            orchestrator.on_stylesheet_changed(&id).await;
                        }
                        None => {
                            info!("CDP event stream ended");
                            break;
                        }
                    }
                }
                _ = poll_timer.tick() => {
                    orchestrator.poll_tick().await;
                }
            }
        }

        sweeper.abort();
        session.close().await;
        Ok(())
    }

    async fn detect_vite_stylesheets(&mut self, session: &SessionManager) {
        let candidates: Vec<(String, String)> = self
            .registry
            .all()
            .filter_map(|record| record.text.as_deref().map(|text| (record.id.clone(), content_key(text))))
            .collect();
        if candidates.is_empty() {
            return;
        }
        for (id, dev_id) in session.match_vite_stylesheets(&candidates).await {
            info!("vite dev-id for stylesheet {id}: {dev_id}");
            self.registry.set_vite_dev_id(&id, PathBuf::from(dev_id));
        }
    }

    fn detect_webpack_stylesheets(&mut self) {
        let targets: Vec<(String, String)> = self
            .registry
            .all()
            .filter(|record| record.header.is_inline)
            .filter_map(|record| record.text.clone().map(|text| (record.id.clone(), text)))
            .collect();

        for (id, text) in targets {
            let Some(reference) = sourcemap::extract_source_map_comment(&text) else {
                continue;
            };
            if !reference.starts_with("data:") {
                continue;
            }
            let map = match self.source_maps.get_or_decode(&id, reference) {
                Ok(map) => map,
                Err(err) => {
                    debug!("failed to decode inline source map for stylesheet {id}: {err}");
                    continue;
                }
            };
            if let Some(original) = sourcemap::find_original_source(map, &self.config.project_root) {
                info!("original source for stylesheet {id}: {}", original.display());
                self.registry.set_original_source(&id, original);
            }
        }
    }

    async fn on_stylesheet_added(&mut self, session: &SessionManager, id: String, header: crate::registry::StylesheetHeader) {
        self.registry.register(id.clone(), header);
        match session.get_stylesheet_text(&id).await {
            Ok(text) => self.registry.update_text(&id, text),
            Err(err) => {
                if is_vanished_stylesheet_error(&err) {
                    self.registry.remove(&id);
                } else {
                    warn!("failed to fetch initial text for stylesheet {id}: {err}");
                }
            }
        }
    }

    async fn on_stylesheet_changed(&mut self, id: &str) {
        let fresh_sheets =
            fresh::get_all_fresh_stylesheets(&self.config.chrome_host, self.config.chrome_port, &self.config.dev_server_base)
                .await;
        let old_text = self.registry.previous_text(id);
        let Some(matched) = find_fresh_match(old_text.as_deref(), &fresh_sheets) else {
            debug!("no fresh match for changed stylesheet {id}");
            return;
        };
        if Some(matched.text.as_str()) == old_text.as_deref() {
            return;
        }
        let new_text = matched.text.clone();
        self.handle_change(id, new_text).await;
    }

    async fn poll_tick(&mut self) {
        let file_based_ids: Vec<String> = self.registry.file_based().map(|record| record.id.clone()).collect();
        if file_based_ids.is_empty() {
            return;
        }
        let fresh_sheets =
            fresh::get_all_fresh_stylesheets(&self.config.chrome_host, self.config.chrome_port, &self.config.dev_server_base)
                .await;
        for id in file_based_ids {
            let old_text = self.registry.previous_text(&id);
            let Some(matched) = find_fresh_match(old_text.as_deref(), &fresh_sheets) else {
                continue;
            };
            if Some(matched.text.as_str()) == old_text.as_deref() {
                continue;
            }
            let new_text = matched.text.clone();
            self.handle_change(&id, new_text).await;
        }
    }

    /// The core pipeline: loop-guard check, diff, resolve a target file,
    /// decide between the generated CSS and its authored SCSS/Sass/Less
    /// source, then patch (spec §4.10).
    async fn handle_change(&mut self, id: &str, new_text: String) {
        if self.loop_guard.should_ignore(&sheet_key(id), &new_text) {
            self.registry.update_text(id, new_text);
            return;
        }

        let previous = self.registry.previous_text(id);
        if previous.as_deref() == Some(new_text.as_str()) {
            self.registry.update_text(id, new_text);
            return;
        }

        let old_text = previous.unwrap_or_default();
        let changes = differ::diff(&old_text, &new_text);
        if changes.is_empty() {
            self.registry.update_text(id, new_text);
            return;
        }

        let Some(record) = self.registry.get(id) else {
            return;
        };
        let target = match record.preferred_source() {
            PreferredSource::Path(path) => Some(path.clone()),
            PreferredSource::Url(url) => url_resolver::resolve(url, &self.config),
            PreferredSource::None => None,
        };

        let under_next_build_output = target
            .as_ref()
            .is_some_and(|path| path.components().any(|component| component.as_os_str() == ".next"));

        if target.is_none() || under_next_build_output {
            if self.try_patch_css_modules(&changes, id).await {
                self.registry.update_text(id, new_text);
                return;
            }
        }

        let Some(mut target) = target else {
            warn!("could not resolve a source file for stylesheet {id}; dropping change");
            self.registry.update_text(id, new_text);
            return;
        };

        if matches!(target.extension().and_then(|ext| ext.to_str()), Some("css")) {
            if let Some(first) = changes.first() {
                if let Some((line, column)) = first.position {
                    if let Some(resolved) = self.reverse_map_position(&target, line, column) {
                        target = resolved;
                    }
                }
            }
        }

        self.apply_patch(&target, &changes, id).await;
        self.registry.update_text(id, new_text);
    }

    /// Fallback used when the resolved target is missing or points inside a
    /// bundler's build output (`.next/`): reinterpret each change's selector
    /// as a CSS-module hashed class name and patch the component stylesheet
    /// it was generated from instead (spec §4.6, §4.10).
    async fn try_patch_css_modules(&mut self, changes: &[DeclarationChange], sheet_id: &str) -> bool {
        let mut by_file: HashMap<PathBuf, Vec<DeclarationChange>> = HashMap::new();
        for change in changes {
            let Some(first_segment) = change.selector.split_whitespace().next() else {
                continue;
            };
            let Some(hashed_class) = first_segment.strip_prefix('.') else {
                continue;
            };
            let Some((file, plain_selector)) =
                self.selector_resolver.resolve(hashed_class, None, &self.config.project_root)
            else {
                continue;
            };
            let mut mapped = change.clone();
            mapped.selector = plain_selector;
            by_file.entry(file).or_default().push(mapped);
        }
        if by_file.is_empty() {
            return false;
        }

        let mut any_applied = false;
        for (file, mapped_changes) in by_file {
            if self.apply_patch(&file, &mapped_changes, sheet_id).await {
                any_applied = true;
            }
        }
        any_applied
    }

    fn reverse_map_position(&mut self, css_path: &Path, line: u32, column: u32) -> Option<PathBuf> {
        let css_dir = css_path.parent().unwrap_or_else(|| Path::new("."));
        let map = self.source_maps.get_or_load_for_path(css_path).ok()?;
        let resolved = sourcemap::original_source_for_position(map, line.saturating_sub(1), column, css_dir)?;
        resolved.is_file().then_some(resolved)
    }

    /// Enqueue a patch for `path` through the file queue, and on success
    /// register the resulting text with the loop guard under both the file
    /// path and the stylesheet id so the echo this write produces is
    /// recognized and absorbed rather than re-diffed.
    async fn apply_patch(&self, path: &Path, changes: &[DeclarationChange], sheet_id: &str) -> bool {
        let changes = changes.to_vec();
        let path_buf = path.to_path_buf();
        let patch_path = path_buf.clone();
        let result = self
            .file_queue
            .with_lock(&path_buf, move || async move { patcher::patch_file(&patch_path, &changes) })
            .await;

        match result {
            Ok((new_text, outcome)) => {
                if !outcome.applied.is_empty() {
                    let path_key = path_buf.display().to_string();
                    self.loop_guard.register_write(&path_key, &new_text);
                    self.loop_guard.register_write(&sheet_key(sheet_id), &new_text);
                    info!(
                        "patched {} ({} applied, {} failed)",
                        path_buf.display(),
                        outcome.applied.len(),
                        outcome.failed.len()
                    );
                }
                if !outcome.failed.is_empty() {
                    warn!(
                        "{} change(s) in {} had no matching declaration",
                        outcome.failed.len(),
                        path_buf.display()
                    );
                }
                !outcome.applied.is_empty()
            }
            Err(err) => {
                error!("failed to patch {}: {err}", path_buf.display());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_matches_sheet_key_format() {
        assert_eq!(sheet_key("42"), "sheet:42");
    }

    #[test]
    fn vanished_stylesheet_error_is_recognized_case_insensitively() {
        let err = anyhow::anyhow!("No stylesheet with given id found");
        assert!(is_vanished_stylesheet_error(&err));
        let other = anyhow::anyhow!("connection reset");
        assert!(!is_vanished_stylesheet_error(&other));
    }

    #[test]
    fn find_fresh_match_prefers_content_key_over_length() {
        let old = ".a { color: red; }";
        let fresh = vec![
            FreshStylesheet {
                id: "x".into(),
                text: "totally unrelated text of the same length!!".into(),
                content_key: content_key("totally unrelated text of the same length!!"),
            },
            FreshStylesheet {
                id: "y".into(),
                text: ".a { color: blue; }".into(),
                content_key: content_key(old),
            },
        ];
        let matched = find_fresh_match(Some(old), &fresh).unwrap();
        assert_eq!(matched.id, "y");
    }

    #[test]
    fn find_fresh_match_falls_back_to_equal_length_when_no_content_key_matches() {
        let old = ".a { color: red; }";
        let fresh = vec![FreshStylesheet {
            id: "z".into(),
            text: ".a { color: blue; }".into(),
            content_key: "completely different prefix".into(),
        }];
        let matched = find_fresh_match(Some(old), &fresh).unwrap();
        assert_eq!(matched.id, "z");
    }

    #[test]
    fn find_fresh_match_returns_none_without_old_text() {
        assert!(find_fresh_match(None, &[]).is_none());
    }
}
