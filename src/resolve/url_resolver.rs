//! C4 — URL Resolver: turns a stylesheet's `sourceURL` into an on-disk path,
//! trying the most specific and cheapest checks first and only returning a
//! path that actually exists.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use url::Url;

use crate::config::{AgentConfig, UrlMapping};

/// Strip a URL's query string and fragment. For an absolute `http(s)://` URL
/// this parses it properly with `url::Url` (the same crate the teacher uses
/// for page navigation), which also normalizes away stray `..`/`.` segments;
/// for a bare path (the common case — `sourceURL`s are usually already
/// relative to `dev_server_base` by the time this runs) it falls back to a
/// manual split, since `Url::parse` requires a scheme.
fn path_only(url: &str) -> Cow<'_, str> {
    if let Ok(parsed) = Url::parse(url) {
        return Cow::Owned(parsed.path().to_owned());
    }
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    Cow::Borrowed(without_query)
}

fn try_path(candidate: PathBuf) -> Option<PathBuf> {
    candidate.is_file().then_some(candidate)
}

/// Resolve a stylesheet's `sourceURL` to a file on disk, in order:
///
/// 1. A literal `file://` URL.
/// 2. The first user-supplied `--map URL_PREFIX=LOCAL_PREFIX` whose prefix
///    matches.
/// 3. Built-in ordered rules, first match wins:
///    - `(/<basePath>)?/_next/static/css/<rest>` — the Next.js app-router
///      heuristic, probing the conventional `globals`/`global` and
///      `page.module`/`styles.module` locations a `layout.css`/`page.css`
///      build asset is compiled from, falling back to a
///      `.next/static/css/`-rooted path (which the orchestrator treats as a
///      signal to fall back to selector-based resolution) when nothing on
///      disk matches.
///    - `/src/<rest>` → `<root>/src/<rest>`.
///    - `/assets/<rest>` → search common style dirs (`assets`, `styles`,
///      `src/assets`, `src/styles`).
///    - `/static/<rest>`, `/styles/<rest>`, `/css/<rest>` → the
///      corresponding top-level dir.
///    - `/<rest>.css` → `<root>/public/<rest>.css`.
/// 4. Fallback: `<root>/<pathname>`, `<root>/src/<pathname>`,
///    `<root>/public/<pathname>`.
///
/// The URL's path is taken relative to `dev_server_base` when it has that
/// prefix; a `sourceURL` that is already a bare path (no scheme/host at all)
/// is used as-is, so a relative path like `/src/app.css` still reaches the
/// built-in rules above instead of only ever matching step 4's fallback.
///
/// Returns `None` if nothing on disk matches.
#[must_use]
pub fn resolve(source_url: &str, config: &AgentConfig) -> Option<PathBuf> {
    if let Some(rest) = source_url.strip_prefix("file://") {
        return try_path(PathBuf::from(rest));
    }

    for mapping in &config.mappings {
        if let Some(candidate) = try_user_mapping(source_url, mapping) {
            return Some(candidate);
        }
    }

    let rel = pathname_relative_to(source_url, &config.dev_server_base);
    let rel_path = Path::new(rel.as_str());
    let root = &config.project_root;

    if let Some(found) = next_js_heuristic(root, rel_path) {
        return Some(found);
    }
    if let Some(found) = try_prefix_rule(root, &rel, "src/", &["src"]) {
        return Some(found);
    }
    if let Some(found) = try_prefix_rule(root, &rel, "assets/", &["assets", "styles", "src/assets", "src/styles"]) {
        return Some(found);
    }
    for prefix in ["static/", "styles/", "css/"] {
        if let Some(found) = try_prefix_rule(root, &rel, prefix, &[prefix.trim_end_matches('/')]) {
            return Some(found);
        }
    }
    if rel.ends_with(".css") {
        if let Some(found) = try_path(root.join("public").join(rel_path)) {
            return Some(found);
        }
    }

    if let Some(found) = try_path(root.join(rel_path)) {
        return Some(found);
    }
    for fallback_root in ["src", "public"] {
        if let Some(found) = try_path(root.join(fallback_root).join(rel_path)) {
            return Some(found);
        }
    }

    None
}

fn try_user_mapping(source_url: &str, mapping: &UrlMapping) -> Option<PathBuf> {
    let rest = source_url.strip_prefix(mapping.url_prefix.as_str())?;
    let rest = rest.trim_start_matches('/');
    let cleaned = path_only(rest);
    try_path(mapping.local_prefix.join(cleaned.as_ref()))
}

/// The URL's path, relative to `dev_server_base` with its leading slash
/// stripped. Falls back to treating `source_url` itself as a bare path when
/// it doesn't start with `dev_server_base` (e.g. an already-relative
/// `sourceURL`), rather than failing resolution outright.
fn pathname_relative_to(source_url: &str, dev_server_base: &str) -> String {
    let candidate = source_url.strip_prefix(dev_server_base).unwrap_or(source_url);
    path_only(candidate).trim_start_matches('/').to_owned()
}

/// Match a `<prefix><rest>` relative path against one of `bases`, returning
/// the first that exists on disk. `prefix` is stripped from `rel` before
/// joining, e.g. `("assets/foo.css", "assets/", ["styles"])` probes
/// `<root>/styles/foo.css`.
fn try_prefix_rule(project_root: &Path, rel: &str, prefix: &str, bases: &[&str]) -> Option<PathBuf> {
    let without_prefix = rel.strip_prefix(prefix)?;
    for base in bases {
        if let Some(found) = try_path(project_root.join(base).join(without_prefix)) {
            return Some(found);
        }
    }
    None
}

/// Next.js compiles each route segment's `layout.css`/`page.css` from
/// authored sources that don't share its build-time name: a `layout.css`
/// bundle is the app's global stylesheet, and a `page.css` bundle is the
/// route's CSS-module file. Only fires for URLs under `_next/static/css/`;
/// returns `None` for anything else so the caller keeps trying its other
/// fallback roots.
fn next_js_heuristic(project_root: &Path, rel_path: &Path) -> Option<PathBuf> {
    const MARKER: &str = "_next/static/css/";
    let rel_str = rel_path.to_str()?;
    let idx = rel_str.find(MARKER)?;
    let rest = Path::new(&rel_str[idx + MARKER.len()..]);

    let file_name = rest.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let dir = rest.parent().unwrap_or_else(|| Path::new(""));
    let found = match file_name {
        "layout.css" => probe_next_js_globals(project_root, dir),
        "page.css" => probe_next_js_page_module(project_root, dir),
        _ => None,
    };

    Some(found.unwrap_or_else(|| project_root.join(".next").join("static").join("css").join(rest)))
}

/// `layout.css` probing: `{<dir>, app/, styles/} × {globals,global} ×
/// {.css,.scss}`.
fn probe_next_js_globals(project_root: &Path, dir: &Path) -> Option<PathBuf> {
    let bases = [project_root.join(dir), project_root.join("app"), project_root.join("styles")];
    for base in &bases {
        for name in ["globals", "global"] {
            for ext in ["css", "scss"] {
                if let Some(found) = try_path(base.join(format!("{name}.{ext}"))) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// `page.css` probing: sibling `page.module.{scss,css}` and
/// `styles.module.{scss,css}`.
fn probe_next_js_page_module(project_root: &Path, dir: &Path) -> Option<PathBuf> {
    let base = project_root.join(dir);
    for name in ["page.module.scss", "page.module.css", "styles.module.scss", "styles.module.css"] {
        if let Some(found) = try_path(base.join(name)) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn config(root: &Path) -> AgentConfig {
        AgentConfig {
            dev_server_base: "http://localhost:3000".into(),
            chrome_host: "localhost".into(),
            chrome_port: 9222,
            project_root: root.to_path_buf(),
            mappings: Vec::new(),
            loop_guard_ttl: Duration::from_millis(2000),
            verbose: false,
        }
    }

    #[test]
    fn path_only_strips_query_from_absolute_url() {
        assert_eq!(path_only("http://localhost:3000/app.css?v=2"), "/app.css");
    }

    #[test]
    fn path_only_strips_query_from_bare_path() {
        assert_eq!(path_only("/app.css?v=2#frag"), "/app.css");
    }

    #[test]
    fn resolves_file_url_directly() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.css");
        fs::write(&file, "").unwrap();
        let url = format!("file://{}", file.display());
        let resolved = resolve(&url, &config(dir.path()));
        assert_eq!(resolved, Some(file));
    }

    #[test]
    fn resolves_via_user_mapping_before_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        fs::create_dir_all(&assets).unwrap();
        fs::write(assets.join("app.css"), "").unwrap();
        let mut cfg = config(dir.path());
        cfg.mappings.push(UrlMapping {
            url_prefix: "/static".into(),
            local_prefix: assets.clone(),
        });
        let resolved = resolve("/static/app.css", &cfg);
        assert_eq!(resolved, Some(assets.join("app.css")));
    }

    #[test]
    fn resolves_relative_to_dev_server_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.css"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/app.css?v=2", &cfg);
        assert_eq!(resolved, Some(dir.path().join("app.css")));
    }

    #[test]
    fn falls_back_to_conventional_source_roots() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("app.css"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/app.css", &cfg);
        assert_eq!(resolved, Some(src.join("app.css")));
    }

    #[test]
    fn next_js_layout_heuristic_finds_globals_css_colocated_with_dir() {
        let dir = tempfile::tempdir().unwrap();
        let route = dir.path().join("dashboard");
        fs::create_dir_all(&route).unwrap();
        fs::write(route.join("globals.css"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/_next/static/css/dashboard/layout.css", &cfg);
        assert_eq!(resolved, Some(route.join("globals.css")));
    }

    #[test]
    fn next_js_layout_heuristic_falls_back_to_styles_dir() {
        let dir = tempfile::tempdir().unwrap();
        let styles = dir.path().join("styles");
        fs::create_dir_all(&styles).unwrap();
        fs::write(styles.join("global.scss"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/_next/static/css/dashboard/layout.css", &cfg);
        assert_eq!(resolved, Some(styles.join("global.scss")));
    }

    #[test]
    fn next_js_page_heuristic_finds_sibling_module_file() {
        let dir = tempfile::tempdir().unwrap();
        let route = dir.path().join("dashboard");
        fs::create_dir_all(&route).unwrap();
        fs::write(route.join("page.module.scss"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/_next/static/css/dashboard/page.css", &cfg);
        assert_eq!(resolved, Some(route.join("page.module.scss")));
    }

    #[test]
    fn next_js_heuristic_falls_back_to_dot_next_path_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/_next/static/css/dashboard/layout.css", &cfg);
        assert_eq!(
            resolved,
            Some(dir.path().join(".next").join("static").join("css").join("dashboard/layout.css"))
        );
    }

    #[test]
    fn falls_back_to_public_dir() {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        fs::create_dir_all(&public).unwrap();
        fs::write(public.join("app.css"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/app.css", &cfg);
        assert_eq!(resolved, Some(public.join("app.css")));
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        assert_eq!(resolve("http://localhost:3000/missing.css", &cfg), None);
    }

    #[test]
    fn resolves_bare_relative_path_not_prefixed_by_dev_server_base() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("app.css"), "").unwrap();
        let cfg = config(dir.path());
        // Not prefixed by `dev_server_base` at all — still reaches the
        // built-in `/src/<rest>` rule instead of only ever falling through
        // to the generic root-relative fallback.
        let resolved = resolve("/src/app.css", &cfg);
        assert_eq!(resolved, Some(src.join("app.css")));
    }

    #[test]
    fn resolves_assets_prefix_via_common_style_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let styles = dir.path().join("styles");
        fs::create_dir_all(&styles).unwrap();
        fs::write(styles.join("theme.css"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/assets/theme.css", &cfg);
        assert_eq!(resolved, Some(styles.join("theme.css")));
    }

    #[test]
    fn resolves_css_prefix_to_top_level_css_dir() {
        let dir = tempfile::tempdir().unwrap();
        let css_dir = dir.path().join("css");
        fs::create_dir_all(&css_dir).unwrap();
        fs::write(css_dir.join("app.css"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/css/app.css", &cfg);
        assert_eq!(resolved, Some(css_dir.join("app.css")));
    }

    #[test]
    fn resolves_static_prefix_to_top_level_static_dir() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        fs::create_dir_all(&static_dir).unwrap();
        fs::write(static_dir.join("app.css"), "").unwrap();
        let cfg = config(dir.path());
        let resolved = resolve("http://localhost:3000/static/app.css", &cfg);
        assert_eq!(resolved, Some(static_dir.join("app.css")));
    }
}
