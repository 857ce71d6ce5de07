//! C5 — Source-map Resolver: decodes a stylesheet's inline source map and
//! reverse-maps generated positions back to authored source positions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::anchor;

static SOURCE_MAPPING_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/\*|//)[#@]\s*sourceMappingURL=(\S+?)\s*(?:\*/)?\s*$").unwrap());

/// Extract the target of a trailing `sourceMappingURL` comment from
/// `css_text`, if present — the first step of both source-map surfaces.
#[must_use]
pub fn extract_source_map_comment(css_text: &str) -> Option<&str> {
    css_text
        .lines()
        .rev()
        .find_map(|line| SOURCE_MAPPING_COMMENT.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn with_map_extension(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".map");
    path.with_file_name(name)
}

/// Load the source map for a CSS file on disk: an inline `data:` comment, an
/// external file the comment names, or the conventional `<file>.map` sibling
/// when there's no comment at all. This is the position reverse-map surface
/// of spec §4.5, distinct from the inline-discovery surface above which
/// works from an already-fetched stylesheet's `sourceMapURL`.
pub fn load_for_css_path(css_path: &Path) -> anyhow::Result<sourcemap::SourceMap> {
    let css_text = std::fs::read_to_string(css_path)
        .with_context(|| format!("failed to read {}", css_path.display()))?;

    if let Some(reference) = extract_source_map_comment(&css_text) {
        if reference.starts_with("data:") {
            return decode_inline(reference);
        }
        let sibling = css_path.with_file_name(reference);
        let bytes = std::fs::read(&sibling)
            .with_context(|| format!("failed to read source map {}", sibling.display()))?;
        return sourcemap::SourceMap::from_slice(&bytes).context("invalid source map JSON");
    }

    let conventional = with_map_extension(css_path);
    let bytes = std::fs::read(&conventional).with_context(|| {
        format!(
            "no sourceMappingURL comment in {} and no {} sibling",
            css_path.display(),
            conventional.display()
        )
    })?;
    sourcemap::SourceMap::from_slice(&bytes).context("invalid source map JSON")
}

/// Reverse-map a generated `(line, column)` to the authored file that
/// defines it, anchoring a relative `sources` entry at `css_dir`. Unlike
/// [`find_original_source`], which just returns the first surviving entry,
/// this follows the token at the exact position so a multi-source map (e.g.
/// several Sass partials concatenated into one stylesheet) resolves to the
/// right one.
#[must_use]
pub fn original_source_for_position(
    map: &sourcemap::SourceMap,
    line: u32,
    column: u32,
    css_dir: &Path,
) -> Option<PathBuf> {
    let token = map.lookup_token(line, column)?;
    let source = token.get_source()?;
    let candidate = PathBuf::from(strip_source_prefix(source));
    Some(anchor(css_dir, &candidate))
}

/// Decode an inline `data:application/json;base64,...` source-map URL into a
/// parsed [`sourcemap::SourceMap`].
pub fn decode_inline(source_map_url: &str) -> anyhow::Result<sourcemap::SourceMap> {
    let url = data_url::DataUrl::process(source_map_url)
        .map_err(|err| anyhow!("not a data: URL: {err:?}"))?;
    let (body, _fragment) = url
        .decode_to_vec()
        .map_err(|err| anyhow!("invalid base64 in inline source map: {err:?}"))?;
    sourcemap::SourceMap::from_slice(&body).context("invalid source map JSON")
}

/// Strip the loader-specific prefixes bundlers put on a source-map `sources`
/// entry so the remainder is a plain project-relative path:
/// `webpack://<host>/`, `webpack-internal:///`, a leading `./`, and any
/// trailing query string.
#[must_use]
pub fn strip_source_prefix(source: &str) -> String {
    let stripped = if let Some(rest) = source.strip_prefix("webpack-internal:///") {
        rest
    } else if let Some(rest) = source.strip_prefix("webpack://") {
        match rest.find('/') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        }
    } else {
        source
    };

    let mut owned = stripped.to_owned();
    while let Some(rest) = owned.strip_prefix("./") {
        owned = rest.to_owned();
    }
    if let Some(idx) = owned.find('?') {
        owned.truncate(idx);
    }
    owned
}

/// Find the first `sources` entry in `map` that, once stripped and anchored
/// under `project_root`, names a file that actually exists.
#[must_use]
pub fn find_original_source(map: &sourcemap::SourceMap, project_root: &Path) -> Option<PathBuf> {
    map.sources().find_map(|source| {
        let candidate = anchor(project_root, Path::new(&strip_source_prefix(source)));
        candidate.is_file().then_some(candidate)
    })
}

/// Reverse-map a generated `(line, column)` position to its authored
/// `(line, column)`, both 0-based per the source-map spec.
#[must_use]
pub fn original_position(map: &sourcemap::SourceMap, line: u32, column: u32) -> Option<(u32, u32)> {
    map.lookup_token(line, column)
        .map(|token| (token.get_src_line(), token.get_src_col()))
}

/// Per-stylesheet cache of decoded source maps, so a poll tick that touches
/// the same stylesheet repeatedly doesn't re-decode and re-parse its inline
/// map every time.
#[derive(Default)]
pub struct SourceMapCache {
    maps: HashMap<String, sourcemap::SourceMap>,
}

impl SourceMapCache {
    /// Construct an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `source_map_url` for `stylesheet_id` if not already cached,
    /// returning the cached map either way.
    pub fn get_or_decode(
        &mut self,
        stylesheet_id: &str,
        source_map_url: &str,
    ) -> anyhow::Result<&sourcemap::SourceMap> {
        if !self.maps.contains_key(stylesheet_id) {
            let map = decode_inline(source_map_url)?;
            self.maps.insert(stylesheet_id.to_owned(), map);
        }
        Ok(&self.maps[stylesheet_id])
    }

    /// Drop a cached map, e.g. when its stylesheet is removed from the
    /// registry.
    pub fn remove(&mut self, stylesheet_id: &str) {
        self.maps.remove(stylesheet_id);
    }

    /// Load (or return already-cached) the source map for a CSS file on
    /// disk, keyed by its path rather than a stylesheet id — the position
    /// reverse-map surface used while deciding whether a change belongs in
    /// the generated `.css` or an authored `.scss`/`.sass`/`.less`.
    pub fn get_or_load_for_path(&mut self, css_path: &Path) -> anyhow::Result<&sourcemap::SourceMap> {
        let key = css_path.display().to_string();
        if !self.maps.contains_key(&key) {
            let map = load_for_css_path(css_path)?;
            self.maps.insert(key.clone(), map);
        }
        Ok(&self.maps[&key])
    }
}
