//! C7 — Structured Patcher: applies [`DeclarationChange`]s to an authored
//! CSS/SCSS file by splicing the original source text at the exact byte
//! spans recorded by `tree::parse`, then writing the result atomically.
//!
//! Both the CSS and SCSS profiles share this module — `tree::parse` already
//! handles SCSS nesting and `&`, and since we only ever touch the spans we
//! recorded, everything else in the file (comments, `$variables`,
//! interpolation, blank lines) is carried through byte-for-byte untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::differ::{ChangeKind, DeclarationChange};
use super::selector::flatten_selectors;
use super::tree::{self, RuleNode, Span};

/// The outcome of applying a batch of changes to one file.
#[derive(Debug, Default)]
pub struct PatchOutcome {
    /// Changes that were located and applied.
    pub applied: Vec<DeclarationChange>,
    /// Changes that could not be matched against the current file contents
    /// (selector no longer present, or value already diverged) — spec §9:
    /// these are reported and the remainder of the batch still proceeds.
    pub failed: Vec<DeclarationChange>,
}

struct TargetDecl {
    value: String,
    important: bool,
    value_span: Span,
    whole_span: Span,
}

fn format_value(value: &str, important: bool) -> String {
    if important {
        format!("{value} !important")
    } else {
        value.to_owned()
    }
}

fn walk_targets(
    rule: &RuleNode,
    parents: &[String],
    decls: &mut HashMap<(String, String), Vec<TargetDecl>>,
    bodies: &mut HashMap<String, Span>,
) {
    let selectors = flatten_selectors(&rule.prelude, parents);
    for selector in &selectors {
        bodies.entry(selector.clone()).or_insert(rule.body_span);
    }
    for decl in &rule.declarations {
        for selector in &selectors {
            decls
                .entry((selector.clone(), decl.name.clone()))
                .or_default()
                .push(TargetDecl {
                    value: decl.value.clone(),
                    important: decl.important,
                    value_span: decl.value_span,
                    whole_span: decl.whole_span,
                });
        }
    }
    for child in &rule.children {
        walk_targets(child, &selectors, decls, bodies);
    }
}

fn collect_targets(text: &str) -> (HashMap<(String, String), Vec<TargetDecl>>, HashMap<String, Span>) {
    let sheet = tree::parse(text);
    let mut decls = HashMap::new();
    let mut bodies = HashMap::new();
    for rule in &sheet.rules {
        walk_targets(rule, &[], &mut decls, &mut bodies);
    }
    (decls, bodies)
}

enum Edit {
    Replace(Span, String),
    Insert(usize, String),
}

fn edit_start(edit: &Edit) -> usize {
    match edit {
        Edit::Replace(span, _) => span.start,
        Edit::Insert(at, _) => *at,
    }
}

/// Apply `changes` to `original`, returning the patched text and which
/// changes were applied versus failed to match. Pure and side-effect free —
/// see [`patch_file`] for the disk-writing wrapper.
#[must_use]
pub fn patch_text(original: &str, changes: &[DeclarationChange]) -> (String, PatchOutcome) {
    let (mut decl_targets, body_spans) = collect_targets(original);
    let mut edits: Vec<Edit> = Vec::new();
    let mut outcome = PatchOutcome::default();

    for change in changes {
        let key = (change.selector.clone(), change.property.clone());
        match change.kind {
            ChangeKind::Modify | ChangeKind::Delete => {
                let Some(list) = decl_targets.get_mut(&key) else {
                    outcome.failed.push(change.clone());
                    continue;
                };
                let wanted = change.old_value.as_deref().unwrap_or_default();
                let found = list
                    .iter()
                    .position(|target| format_value(&target.value, target.important) == wanted);
                let Some(index) = found else {
                    outcome.failed.push(change.clone());
                    continue;
                };
                let target = list.remove(index);
                match change.kind {
                    ChangeKind::Modify => {
                        let new_value = change.new_value.clone().unwrap_or_default();
                        edits.push(Edit::Replace(target.value_span, new_value));
                    }
                    ChangeKind::Delete => {
                        edits.push(Edit::Replace(target.whole_span, String::new()));
                    }
                    ChangeKind::Add => unreachable!("handled in the other match arm"),
                }
                outcome.applied.push(change.clone());
            }
            ChangeKind::Add => {
                let new_value = change.new_value.clone().unwrap_or_default();
                // The authored file can already declare this property even though it's
                // an Add in the diff: write in place instead of appending a duplicate.
                if let Some(list) = decl_targets.get_mut(&key) {
                    if let Some(target) = list.pop() {
                        edits.push(Edit::Replace(target.value_span, new_value));
                        outcome.applied.push(change.clone());
                        continue;
                    }
                }
                let Some(body_span) = body_spans.get(&change.selector) else {
                    outcome.failed.push(change.clone());
                    continue;
                };
                let insertion = format!("\n  {}: {};", change.property, new_value);
                edits.push(Edit::Insert(body_span.end, insertion));
                outcome.applied.push(change.clone());
            }
        }
    }

    edits.sort_by_key(|edit| std::cmp::Reverse(edit_start(edit)));
    let mut out = original.to_owned();
    for edit in edits {
        match edit {
            Edit::Replace(span, text) => out.replace_range(span.start..span.end, &text),
            Edit::Insert(at, text) => out.insert_str(at, &text),
        }
    }
    (out, outcome)
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{file_name}.{nanos}.tmp"))
}

/// Write `contents` to `path` atomically: write to a sibling temp file, then
/// rename over `path`. A crash mid-write leaves the original file intact.
fn atomic_write(path: &Path, contents: &str) -> anyhow::Result<()> {
    let tmp_path = sibling_tmp_path(path);
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read `path`, apply `changes`, and atomically write the result back if at
/// least one change applied. Returns the new text (so the caller can update
/// the registry and loop guard without re-reading the file) and the outcome.
pub fn patch_file(path: &Path, changes: &[DeclarationChange]) -> anyhow::Result<(String, PatchOutcome)> {
    let original = std::fs::read_to_string(path)?;
    let (new_text, outcome) = patch_text(&original, changes);
    if !outcome.applied.is_empty() {
        atomic_write(path, &new_text)?;
    }
    Ok((new_text, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::differ;

    #[test]
    fn modify_round_trips_surrounding_text() {
        let original = "/* keep me */\n.a {\n  color: red; /* trailing */\n}\n";
        let changes = vec![DeclarationChange {
            selector: ".a".into(),
            property: "color".into(),
            old_value: Some("red".into()),
            new_value: Some("blue".into()),
            kind: ChangeKind::Modify,
            position: Some((2, 2)),
        }];
        let (patched, outcome) = patch_text(original, &changes);
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.failed.is_empty());
        assert_eq!(patched, "/* keep me */\n.a {\n  color: blue; /* trailing */\n}\n");
    }

    #[test]
    fn delete_removes_declaration_and_semicolon() {
        let original = ".a { color: red; font-weight: bold; }";
        let changes = vec![DeclarationChange {
            selector: ".a".into(),
            property: "font-weight".into(),
            old_value: Some("bold".into()),
            new_value: None,
            kind: ChangeKind::Delete,
            position: None,
        }];
        let (patched, outcome) = patch_text(original, &changes);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(patched, ".a { color: red;  }");
    }

    #[test]
    fn add_appends_at_end_of_body() {
        let original = ".a { color: red; }";
        let changes = vec![DeclarationChange {
            selector: ".a".into(),
            property: "font-weight".into(),
            old_value: None,
            new_value: Some("bold".into()),
            kind: ChangeKind::Add,
            position: Some((1, 6)),
        }];
        let (patched, outcome) = patch_text(original, &changes);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(patched, ".a { color: red; \n  font-weight: bold; }");
    }

    #[test]
    fn add_writes_in_place_when_authored_file_already_has_the_property() {
        // The diff was computed against the browser's compiled text, but the
        // authored file the patch lands on already declares `font-weight` —
        // this must modify it in place, not append a duplicate declaration.
        let original = ".a { color: red; font-weight: normal; }";
        let changes = vec![DeclarationChange {
            selector: ".a".into(),
            property: "font-weight".into(),
            old_value: None,
            new_value: Some("bold".into()),
            kind: ChangeKind::Add,
            position: Some((1, 6)),
        }];
        let (patched, outcome) = patch_text(original, &changes);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(patched, ".a { color: red; font-weight: bold; }");
    }

    #[test]
    fn unmatched_change_fails_without_panicking() {
        let original = ".a { color: red; }";
        let changes = vec![DeclarationChange {
            selector: ".missing".into(),
            property: "color".into(),
            old_value: Some("red".into()),
            new_value: Some("blue".into()),
            kind: ChangeKind::Modify,
            position: Some((1, 0)),
        }];
        let (patched, outcome) = patch_text(original, &changes);
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(patched, original);
    }

    #[test]
    fn applying_a_real_diff_round_trips_to_the_new_text_shape() {
        let old = ".a { color: red; }";
        let new = ".a { color: blue; }";
        let changes = differ::diff(old, new);
        let (patched, outcome) = patch_text(old, &changes);
        assert!(outcome.failed.is_empty());
        assert_eq!(patched, new);
    }

    #[test]
    fn nested_scss_rule_is_patched_via_flattened_selector() {
        let old = ".btn {\n  &.active {\n    color: red;\n  }\n}\n";
        let changes = vec![DeclarationChange {
            selector: ".btn.active".into(),
            property: "color".into(),
            old_value: Some("red".into()),
            new_value: Some("green".into()),
            kind: ChangeKind::Modify,
            position: Some((3, 4)),
        }];
        let (patched, outcome) = patch_text(old, &changes);
        assert!(outcome.failed.is_empty());
        assert_eq!(patched, ".btn {\n  &.active {\n    color: green;\n  }\n}\n");
    }
}
