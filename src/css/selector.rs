//! Selector flattening shared by the differ (C3) and the patcher (C7), so
//! both sides resolve a nested rule's effective selector identically.

/// Collapse runs of ASCII whitespace to a single space and trim the ends.
#[must_use]
pub fn normalize_whitespace(selector: &str) -> String {
    let mut out = String::with_capacity(selector.len());
    let mut last_was_space = true;
    for ch in selector.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

/// Split `selector` on top-level commas — commas inside `()`, `[]`, or
/// quoted strings (e.g. `:not(a, b)`, `[data-x="a,b"]`) do not split.
#[must_use]
pub fn split_top_level_commas(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (i, ch) in selector.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth <= 0 => {
                parts.push(&selector[start..i]);
                start = i + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&selector[start..]);
    parts
}

/// Combine one ancestor selector with one direct child prelude, resolving
/// SCSS-style `&` nesting. `&.x` becomes `<ancestor>.x`; `& x` becomes
/// `<ancestor> x`; a prelude with no `&` is joined as a plain descendant
/// combinator.
fn combine(ancestor: &str, child: &str) -> String {
    let child = child.trim();
    if child.contains('&') {
        normalize_whitespace(&child.replace('&', ancestor))
    } else {
        normalize_whitespace(&format!("{ancestor} {child}"))
    }
}

/// Flatten one rule's prelude against the selectors of its enclosing rules,
/// producing every effective selector this rule's declarations apply under.
/// `parents` is empty for a top-level rule. A prelude containing a top-level
/// comma expands to one result per comma-separated part, combined with every
/// parent selector.
#[must_use]
pub fn flatten_selectors(prelude: &str, parents: &[String]) -> Vec<String> {
    let parts: Vec<String> = split_top_level_commas(prelude)
        .into_iter()
        .map(|part| normalize_whitespace(part))
        .filter(|part| !part.is_empty())
        .collect();

    if parents.is_empty() {
        return parts;
    }
    let mut out = Vec::with_capacity(parents.len() * parts.len());
    for parent in parents {
        for part in &parts {
            out.push(combine(parent, part));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_top_level_commas_only() {
        let parts = split_top_level_commas(".a, .b:not(.c, .d), .e[data-x=\"a,b\"]");
        assert_eq!(parts, vec![".a", " .b:not(.c, .d)", " .e[data-x=\"a,b\"]"]);
    }

    #[test]
    fn flattens_top_level_rule() {
        let result = flatten_selectors(".card, .panel", &[]);
        assert_eq!(result, vec![".card", ".panel"]);
    }

    #[test]
    fn resolves_ampersand_suffix() {
        let result = flatten_selectors("&.active", &[".btn".to_string()]);
        assert_eq!(result, vec![".btn.active"]);
    }

    #[test]
    fn resolves_ampersand_descendant() {
        let result = flatten_selectors("& .icon", &[".btn".to_string()]);
        assert_eq!(result, vec![".btn .icon"]);
    }

    #[test]
    fn joins_plain_descendant_without_ampersand() {
        let result = flatten_selectors(".title", &[".card".to_string()]);
        assert_eq!(result, vec![".card .title"]);
    }

    #[test]
    fn expands_comma_across_multiple_parents() {
        let result = flatten_selectors("&.a, &.b", &[".x".to_string(), ".y".to_string()]);
        assert_eq!(result, vec![".x.a", ".x.b", ".y.a", ".y.b"]);
    }

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(normalize_whitespace("  .a   .b\n.c  "), ".a .b .c");
    }
}
