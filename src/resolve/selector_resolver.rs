//! C6 — Selector Resolver: maps a CSS-module hashed class name (as seen on
//! a live DOM node, e.g. `Button_primary__x7f3a`) back to the plain
//! `.primary`-style selector and source file it was generated from.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

const SKIP_DIRS: [&str; 5] = ["node_modules", ".next", ".git", "dist", "build"];
const MAX_DEPTH: u32 = 10;

/// Ordered recognizers for the hashed class-name shapes different CSS-module
/// loaders produce, most-specific (path-segment-prefixed) first so a name
/// carrying directory segments doesn't get swallowed by a looser pattern
/// before the tighter one gets a chance. Every shape names a component that
/// must start with a capital letter.
static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // `Menu-module_item__abc`
        Regex::new(r"^([A-Z][A-Za-z0-9]*)-module_([A-Za-z0-9]+)__([A-Za-z0-9]+)$").unwrap(),
        // `components_playground_Menu-module_item__abc`
        Regex::new(r"^(?:[A-Za-z0-9]+_)+([A-Z][A-Za-z0-9]*)-module_([A-Za-z0-9]+)__([A-Za-z0-9]+)$")
            .unwrap(),
        // `src-components-Menu-module__item--abc`
        Regex::new(r"^(?:[A-Za-z0-9]+-)+([A-Z][A-Za-z0-9]*)-module__([A-Za-z0-9]+)--([A-Za-z0-9]+)$")
            .unwrap(),
        // `components_Menu_item__abc`
        Regex::new(r"^(?:[A-Za-z0-9]+_)+([A-Z][A-Za-z0-9]*)_([A-Za-z0-9]+)__([A-Za-z0-9]+)$")
            .unwrap(),
        // `Menu_item__abc`
        Regex::new(r"^([A-Z][A-Za-z0-9]*)_([A-Za-z0-9]+)__([A-Za-z0-9]+)$").unwrap(),
    ]
});

/// Pull the component name and plain class name out of a hashed class.
/// Patterns are tried in the fixed order above; the first match wins. Returns
/// `None` if the hash matches none of the five documented shapes.
fn extract_class_name(hashed: &str) -> Option<(Option<String>, String)> {
    for pattern in PATTERNS.iter() {
        if let Some(caps) = pattern.captures(hashed) {
            return Some((Some(caps[1].to_owned()), caps[2].to_owned()));
        }
    }
    None
}

fn is_stylesheet(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("css" | "scss")
    )
}

/// Breadth-first walk of `root` collecting `.css`/`.scss` files, skipping
/// dependency/build directories and bounded to `MAX_DEPTH`.
fn walk_stylesheets(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut queue: VecDeque<(PathBuf, u32)> = VecDeque::new();
    queue.push_back((root.to_path_buf(), 0));

    while let Some((dir, depth)) = queue.pop_front() {
        if depth > MAX_DEPTH {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if !SKIP_DIRS.contains(&name) {
                    queue.push_back((path, depth + 1));
                }
            } else if is_stylesheet(&path) {
                found.push(path);
            }
        }
    }
    found
}

/// Rank candidates so a file whose basename names the hinted component comes
/// first (e.g. `Button.module.css` for class names derived from `Button`).
fn rank(path: &Path, component_hint: Option<&str>) -> (u8, PathBuf) {
    let priority = match component_hint {
        Some(hint) => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .trim_end_matches(".module");
            if stem.eq_ignore_ascii_case(hint) {
                0
            } else {
                1
            }
        }
        None => 1,
    };
    (priority, path.to_path_buf())
}

/// Return the plain selector if `content` defines `class_name` in any of the
/// shapes a rule or nested SCSS rule can take.
fn grep_selector(content: &str, class_name: &str) -> Option<String> {
    let escaped = regex::escape(class_name);
    let patterns = [
        format!(r"\.{escaped}\s*\{{"),
        format!(r"&\.{escaped}\s*\{{"),
        format!(r"\.{escaped}\s*,"),
        format!(r"(?m)\.{escaped}$"),
    ];
    for pattern in &patterns {
        if Regex::new(pattern).is_ok_and(|re| re.is_match(content)) {
            return Some(format!(".{class_name}"));
        }
    }
    None
}

/// Caches the hashed-class-name → `(file, selector)` resolution and the file
/// contents read along the way, so repeated lookups against the same
/// stylesheet (common across a burst of edits to one component) don't re-walk
/// the project tree or re-read files already seen this run.
#[derive(Default)]
pub struct SelectorResolver {
    results: HashMap<String, Option<(PathBuf, String)>>,
    contents: HashMap<PathBuf, String>,
}

impl SelectorResolver {
    /// Construct an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `hashed_class` to its source file and plain selector, walking
    /// `project_root` if not already cached.
    pub fn resolve(
        &mut self,
        hashed_class: &str,
        component_hint: Option<&str>,
        project_root: &Path,
    ) -> Option<(PathBuf, String)> {
        if let Some(cached) = self.results.get(hashed_class) {
            return cached.clone();
        }

        let result = self.resolve_uncached(hashed_class, component_hint, project_root);
        self.results.insert(hashed_class.to_owned(), result.clone());
        result
    }

    fn resolve_uncached(
        &mut self,
        hashed_class: &str,
        component_hint: Option<&str>,
        project_root: &Path,
    ) -> Option<(PathBuf, String)> {
        let (extracted_hint, class_name) = extract_class_name(hashed_class)?;
        let hint = component_hint.or(extracted_hint.as_deref());

        let mut candidates = walk_stylesheets(project_root);
        candidates.sort_by(|a, b| rank(a, hint).cmp(&rank(b, hint)));

        for file in candidates {
            let content = match self.contents.get(&file) {
                Some(content) => content.clone(),
                None => {
                    let Ok(content) = std::fs::read_to_string(&file) else {
                        continue;
                    };
                    self.contents.insert(file.clone(), content.clone());
                    content
                }
            };
            if let Some(selector) = grep_selector(&content, &class_name) {
                return Some((file, selector));
            }
        }
        None
    }
}
