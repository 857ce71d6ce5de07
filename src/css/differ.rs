//! C3 — Declaration Differ: turns two full stylesheet snapshots into the
//! ordered list of per-declaration changes between them.

use std::collections::HashMap;

use super::selector::flatten_selectors;
use super::tree::{self, line_column, RuleNode};

/// What kind of change a [`DeclarationChange`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// A property that did not exist for this selector in the old text.
    Add,
    /// A property whose value or `!important` flag changed.
    Modify,
    /// A property present in the old text with no counterpart in the new
    /// text at the same occurrence index.
    Delete,
}

/// One declaration-level change between an old and new stylesheet snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclarationChange {
    /// The flattened selector this declaration applies under (`&` already
    /// resolved against ancestors).
    pub selector: String,
    /// Property name, lowercased.
    pub property: String,
    /// Value text (including a literal ` !important` suffix when set) before
    /// the change. `None` for [`ChangeKind::Add`].
    pub old_value: Option<String>,
    /// Value text (including a literal ` !important` suffix when set) after
    /// the change. `None` for [`ChangeKind::Delete`].
    pub new_value: Option<String>,
    /// What kind of change this is.
    pub kind: ChangeKind,
    /// 1-based line, 0-based column of the declaration in the *new* text.
    /// `None` for [`ChangeKind::Delete`], since the declaration has no
    /// position in text that no longer contains it.
    pub position: Option<(u32, u32)>,
}

#[derive(Clone)]
struct FlatDecl {
    value: String,
    important: bool,
    byte_offset: usize,
}

fn format_value(value: &str, important: bool) -> String {
    if important {
        format!("{value} !important")
    } else {
        value.to_owned()
    }
}

fn walk(rule: &RuleNode, parents: &[String], out: &mut HashMap<(String, String), Vec<FlatDecl>>) {
    let selectors = flatten_selectors(&rule.prelude, parents);
    for decl in &rule.declarations {
        for selector in &selectors {
            out.entry((selector.clone(), decl.name.clone()))
                .or_default()
                .push(FlatDecl {
                    value: decl.value.clone(),
                    important: decl.important,
                    byte_offset: decl.value_span.start,
                });
        }
    }
    for child in &rule.children {
        walk(child, &selectors, out);
    }
}

/// Flatten a parsed stylesheet into a map from `(selector, property)` to the
/// ordered list of occurrences (CSS allows duplicate declarations; later
/// ones win at render time but all are tracked so the parallel-index diff
/// below can tell an edit of the 2nd occurrence from an edit of the 1st).
fn collect(text: &str) -> HashMap<(String, String), Vec<FlatDecl>> {
    let sheet = tree::parse(text);
    let mut out = HashMap::new();
    for rule in &sheet.rules {
        walk(rule, &[], &mut out);
    }
    out
}

/// Diff two full stylesheet texts, producing every declaration-level change
/// between them (spec §3, §4.3).
///
/// Declarations are grouped by `(selector, property)`; within a group, old
/// and new occurrences are compared index-wise (their order of appearance in
/// source). An index present on both sides is a [`ChangeKind::Modify`] when
/// the value or `!important` flag differs, and no change when it doesn't. An
/// index present only in the new text is an [`ChangeKind::Add`]; any trailing
/// old index beyond the new text's occurrence count is a
/// [`ChangeKind::Delete`].
#[must_use]
pub fn diff(old_text: &str, new_text: &str) -> Vec<DeclarationChange> {
    let old_groups = collect(old_text);
    let new_groups = collect(new_text);

    let mut keys: Vec<(String, String)> = Vec::new();
    for key in old_groups.keys().chain(new_groups.keys()) {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }

    let empty: Vec<FlatDecl> = Vec::new();
    let mut changes = Vec::new();
    for (selector, property) in keys {
        let olds = old_groups.get(&(selector.clone(), property.clone())).unwrap_or(&empty);
        let news = new_groups.get(&(selector.clone(), property.clone())).unwrap_or(&empty);
        let len = olds.len().max(news.len());
        for i in 0..len {
            match (olds.get(i), news.get(i)) {
                (Some(old), Some(new)) => {
                    if old.value != new.value || old.important != new.important {
                        changes.push(DeclarationChange {
                            selector: selector.clone(),
                            property: property.clone(),
                            old_value: Some(format_value(&old.value, old.important)),
                            new_value: Some(format_value(&new.value, new.important)),
                            kind: ChangeKind::Modify,
                            position: Some(line_column(new_text, new.byte_offset)),
                        });
                    }
                }
                (None, Some(new)) => {
                    changes.push(DeclarationChange {
                        selector: selector.clone(),
                        property: property.clone(),
                        old_value: None,
                        new_value: Some(format_value(&new.value, new.important)),
                        kind: ChangeKind::Add,
                        position: Some(line_column(new_text, new.byte_offset)),
                    });
                }
                (Some(old), None) => {
                    changes.push(DeclarationChange {
                        selector: selector.clone(),
                        property: property.clone(),
                        old_value: Some(format_value(&old.value, old.important)),
                        new_value: None,
                        kind: ChangeKind::Delete,
                        position: None,
                    });
                }
                (None, None) => unreachable!("index bounded by max occurrence count"),
            }
        }
    }
    changes
}
