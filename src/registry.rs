//! C1 — Stylesheet Registry: the authoritative map of every stylesheet the
//! agent currently knows about, with its last-known text and resolved
//! source metadata.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

/// Opaque stylesheet identifier, unique per CDP session (spec §3).
pub type StylesheetId = String;

/// Snapshot of the browser-supplied metadata for a stylesheet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StylesheetHeader {
    /// The stylesheet's `sourceURL`, possibly empty.
    pub source_url: String,
    /// Whether this stylesheet is an inline `<style>` element.
    pub is_inline: bool,
    /// The stylesheet's `sourceMapURL`, possibly empty.
    pub source_map_url: String,
}

/// One entry in the registry — everything the agent knows about a single
/// live stylesheet.
#[derive(Clone, Debug)]
pub struct StylesheetRecord {
    /// The stylesheet's id, as assigned by the browser.
    pub id: StylesheetId,
    /// Last metadata snapshot supplied by the browser.
    pub header: StylesheetHeader,
    /// Most recent full text known to the agent.
    pub text: Option<String>,
    /// When `text` was last updated.
    pub last_modified: Option<Instant>,
    /// Absolute path announced by a Vite-style bundler via
    /// `data-vite-dev-id` on the owning `<style>` element.
    pub vite_dev_id: Option<PathBuf>,
    /// Authored source resolved from an inline source map (webpack/Next.js).
    pub original_source: Option<PathBuf>,
}

impl StylesheetRecord {
    fn new(id: StylesheetId, header: StylesheetHeader) -> Self {
        Self {
            id,
            header,
            text: None,
            last_modified: None,
            vite_dev_id: None,
            original_source: None,
        }
    }

    /// The file this record's authored source should resolve to, following
    /// the preference order `vite_dev_id > original_source > header.sourceURL`
    /// (spec §3, §4.10). Returns `None` when only `header.sourceURL` is
    /// available and it is empty or inline.
    #[must_use]
    pub fn preferred_source(&self) -> PreferredSource<'_> {
        if let Some(path) = &self.vite_dev_id {
            PreferredSource::Path(path)
        } else if let Some(path) = &self.original_source {
            PreferredSource::Path(path)
        } else if !self.header.is_inline && !self.header.source_url.is_empty() {
            PreferredSource::Url(&self.header.source_url)
        } else {
            PreferredSource::None
        }
    }

    /// True if this record is backed by an authored file at all (as opposed
    /// to a pure in-memory/inline blob with no resolvable source) — see
    /// `Registry::file_based`.
    #[must_use]
    pub fn is_file_based(&self) -> bool {
        self.vite_dev_id.is_some()
            || self.original_source.is_some()
            || (!self.header.is_inline
                && (self.header.source_url.starts_with("http")
                    || self.header.source_url.starts_with("file")))
    }
}

/// Where a record's authored source is expected to live, per the preference
/// order in spec §3.
#[derive(Debug)]
pub enum PreferredSource<'a> {
    /// A filesystem path already resolved (vite dev-id or source-map hit).
    Path(&'a PathBuf),
    /// A stylesheet URL still needing resolution through C4/C5/C6.
    Url(&'a str),
    /// Nothing usable yet.
    None,
}

/// C1 — authoritative, in-memory map of live stylesheets. Recreated on each
/// agent start; explicitly cleared before a page reload (spec §4.10 step 3).
#[derive(Default)]
pub struct Registry {
    records: HashMap<StylesheetId, StylesheetRecord>,
}

impl Registry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stylesheet. Idempotent: if `id` is already registered,
    /// this is a no-op that returns the existing record unchanged.
    pub fn register(&mut self, id: StylesheetId, header: StylesheetHeader) -> &StylesheetRecord {
        self.records
            .entry(id.clone())
            .or_insert_with(|| StylesheetRecord::new(id.clone(), header));
        &self.records[&id]
    }

    /// Set the most recent full text for a stylesheet and bump its
    /// `last_modified` timestamp. `text` monotonically advances — callers
    /// are expected to only call this with a strictly newer snapshot.
    pub fn update_text(&mut self, id: &str, text: String) {
        if let Some(record) = self.records.get_mut(id) {
            record.text = Some(text);
            record.last_modified = Some(Instant::now());
        }
    }

    /// The text last known for `id`, used as the "old" input to the differ.
    #[must_use]
    pub fn previous_text(&self, id: &str) -> Option<String> {
        self.records.get(id).and_then(|record| record.text.clone())
    }

    /// Record a bundler-announced absolute path for an inline `<style>`.
    pub fn set_vite_dev_id(&mut self, id: &str, path: PathBuf) {
        if let Some(record) = self.records.get_mut(id) {
            record.vite_dev_id = Some(path);
        }
    }

    /// Record an authored source resolved from an inline source map.
    pub fn set_original_source(&mut self, id: &str, path: PathBuf) {
        if let Some(record) = self.records.get_mut(id) {
            record.original_source = Some(path);
        }
    }

    /// Fetch a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StylesheetRecord> {
        self.records.get(id)
    }

    /// Records backed by an authored file: any record with a non-empty
    /// `vite_dev_id` or `original_source`, or whose `sourceURL` is a
    /// non-inline `http`/`file` URL.
    pub fn file_based(&self) -> impl Iterator<Item = &StylesheetRecord> {
        self.records.values().filter(|record| record.is_file_based())
    }

    /// Every tracked record, file-based or not — used by the Vite/Next.js
    /// detection passes, which must consider inline `<style>` elements too.
    pub fn all(&self) -> impl Iterator<Item = &StylesheetRecord> {
        self.records.values()
    }

    /// Drop a record, e.g. on browser-signaled removal or a "no stylesheet
    /// with that id" fetch failure.
    pub fn remove(&mut self, id: &str) {
        self.records.remove(id);
    }

    /// Drop every record, e.g. before issuing a page reload.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of tracked stylesheets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no stylesheets are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(url: &str) -> StylesheetHeader {
        StylesheetHeader {
            source_url: url.to_owned(),
            is_inline: false,
            source_map_url: String::new(),
        }
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = Registry::new();
        registry.register("1".into(), header("/a.css"));
        registry.update_text("1", "body{color:red}".into());
        registry.register("1".into(), header("/different.css"));
        let record = registry.get("1").unwrap();
        assert_eq!(record.header.source_url, "/a.css");
        assert_eq!(record.text.as_deref(), Some("body{color:red}"));
    }

    #[test]
    fn preference_order_prefers_vite_then_original_then_url() {
        let mut registry = Registry::new();
        registry.register("1".into(), header("https://x/app.css"));
        assert!(matches!(
            registry.get("1").unwrap().preferred_source(),
            PreferredSource::Url("https://x/app.css")
        ));

        registry.set_original_source("1", PathBuf::from("/proj/app.scss"));
        assert!(matches!(
            registry.get("1").unwrap().preferred_source(),
            PreferredSource::Path(_)
        ));

        registry.set_vite_dev_id("1", PathBuf::from("/proj/src/app.css"));
        match registry.get("1").unwrap().preferred_source() {
            PreferredSource::Path(path) => assert_eq!(path, &PathBuf::from("/proj/src/app.css")),
            other => panic!("expected vite dev id to win, got {other:?}"),
        }
    }

    #[test]
    fn file_based_filters_inline_without_mapping() {
        let mut registry = Registry::new();
        registry.register(
            "1".into(),
            StylesheetHeader {
                source_url: String::new(),
                is_inline: true,
                source_map_url: String::new(),
            },
        );
        registry.register("2".into(), header("https://x/app.css"));
        let ids: Vec<_> = registry.file_based().map(|record| record.id.clone()).collect();
        assert_eq!(ids, vec!["2".to_string()]);
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = Registry::new();
        registry.register("1".into(), header("/a.css"));
        registry.register("2".into(), header("/b.css"));
        registry.remove("1");
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
