//! A nesting-aware CSS/SCSS parse tree that records the exact byte span of
//! every prelude, declaration value, and rule body in the original source
//! text.
//!
//! This generalizes the teacher's flat stylesheet parser
//! (`examples/BigBadE-valor/crates/css/modules/syntax/src/lib.rs`, which
//! uses `cssparser`'s `StyleSheetParser`/`RuleBodyParser` combinators but
//! rejects anything but declarations inside a rule body) to arbitrary
//! nesting by implementing `QualifiedRuleParser` recursively and enabling
//! `parse_qualified()` on the body-item parser. Spans are recovered without
//! depending on any private `cssparser` offset API: `Parser::slice_from`
//! returns a zero-copy sub-slice of the original `&str`, so its byte offset
//! is recovered with pointer arithmetic against the original text.

use cssparser::{
    AtRuleParser, BasicParseErrorKind, CowRcStr, DeclarationParser, ParseError, Parser,
    ParserInput, ParserState, QualifiedRuleParser, RuleBodyItemParser, RuleBodyParser,
    StyleSheetParser,
};

/// A half-open byte range `[start, end)` into the original source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    /// Start byte offset, inclusive.
    pub start: usize,
    /// End byte offset, exclusive.
    pub end: usize,
}

/// One `property: value[ !important];` declaration, with the byte spans
/// needed to edit it in place.
#[derive(Clone, Debug)]
pub struct DeclNode {
    /// Lowercased property name.
    pub name: String,
    /// The value text, trimmed, with any trailing `!important` stripped.
    pub value: String,
    /// Whether the declaration carries `!important`.
    pub important: bool,
    /// Span of the trimmed `value[ !important]` text — what gets
    /// overwritten on `modify`.
    pub value_span: Span,
    /// Span from the start of the property name through the declaration's
    /// trailing `;` (if present) — what gets removed on `delete`.
    pub whole_span: Span,
}

/// A style rule: a prelude (selector, for plain CSS or SCSS), its direct
/// declarations, and any nested rules.
#[derive(Clone, Debug)]
pub struct RuleNode {
    /// Raw prelude text (trimmed), e.g. `.card .title` or `&.active`.
    pub prelude: String,
    /// Declarations directly inside this rule's body, in source order.
    pub declarations: Vec<DeclNode>,
    /// Rules nested inside this rule's body, in source order.
    pub children: Vec<RuleNode>,
    /// Span of the body's content, excluding the enclosing braces. Used as
    /// the insertion point when a change adds a declaration whose property
    /// has no existing match in the rule.
    pub body_span: Span,
}

/// A parsed stylesheet: its top-level rules. At-rules (`@media`, etc.) and
/// bare top-level statements (e.g. a top-level SCSS `$var: ...;`) are
/// skipped — they are untouched by the patcher by construction, since it
/// only ever edits spans this tree records.
#[derive(Clone, Debug, Default)]
pub struct Stylesheet {
    /// Top-level rules in source order.
    pub rules: Vec<RuleNode>,
}

/// Either a declaration or a nested rule, unified so `cssparser`'s
/// `RuleBodyParser` can treat a rule body as a mix of both (this is exactly
/// what the CSS Nesting grammar needs, and what SCSS needs too).
enum RuleItem {
    Decl(DeclNode),
    Rule(RuleNode),
}

/// Recover the byte offset of a zero-copy sub-slice within the original
/// source text. Safe because `cssparser::Parser` never copies its input —
/// every `slice_from`/`slice` call returns a sub-slice of the same buffer.
fn offset_of(text: &str, slice: &str) -> usize {
    (slice.as_ptr() as usize).saturating_sub(text.as_ptr() as usize)
}

/// Split `!important` off the end of a trimmed declaration value.
fn split_important_tail(value: &str) -> (String, bool) {
    let trimmed = value.trim();
    if let Some(pos) = trimmed.to_ascii_lowercase().rfind("!important")
        && trimmed[pos..].trim() == trimmed[pos..].to_ascii_lowercase().trim()
        && let Some(prefix) = trimmed.get(..pos)
    {
        return (prefix.trim_end().to_owned(), true);
    }
    (trimmed.to_owned(), false)
}

struct TreeParser<'i> {
    text: &'i str,
}

impl<'i> DeclarationParser<'i> for TreeParser<'i> {
    type Declaration = RuleItem;
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        decl_start: &ParserState,
    ) -> Result<Self::Declaration, ParseError<'i, Self::Error>> {
        let value_start_state = input.state();
        while input.next_including_whitespace_and_comments().is_ok() {}

        let raw = input.slice_from(value_start_state.position());
        let trimmed = raw.trim();
        let lead_ws = raw.len() - raw.trim_start().len();
        let value_start = offset_of(self.text, raw) + lead_ws;
        let value_end = value_start + trimmed.len();
        let (value, important) = split_important_tail(trimmed);

        let whole_slice = input.slice_from(decl_start.position());
        let whole_start = offset_of(self.text, whole_slice);
        let mut whole_end = value_end;
        if self.text.as_bytes().get(whole_end) == Some(&b';') {
            whole_end += 1;
        }

        Ok(RuleItem::Decl(DeclNode {
            name: name.to_ascii_lowercase(),
            value,
            important,
            value_span: Span {
                start: value_start,
                end: value_end,
            },
            whole_span: Span {
                start: whole_start,
                end: whole_end,
            },
        }))
    }
}

impl<'i> AtRuleParser<'i> for TreeParser<'i> {
    type Prelude = ();
    type AtRule = RuleItem;
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        _name: CowRcStr<'i>,
        _input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        Ok(())
    }

    fn parse_block<'t>(
        &mut self,
        _prelude: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::AtRule, ParseError<'i, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::AtRuleBodyInvalid))
    }

    fn rule_without_block(
        &mut self,
        _prelude: Self::Prelude,
        _start: &ParserState,
    ) -> Result<Self::AtRule, ()> {
        Err(())
    }
}

impl<'i> QualifiedRuleParser<'i> for TreeParser<'i> {
    type Prelude = String;
    type QualifiedRule = RuleItem;
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        let start = input.state();
        while input.next_including_whitespace_and_comments().is_ok() {}
        Ok(input.slice_from(start.position()).trim().to_owned())
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, ParseError<'i, Self::Error>> {
        let body_start_state = input.state();
        let mut declarations = Vec::new();
        let mut children = Vec::new();
        for item in RuleBodyParser::new(input, self).flatten() {
            match item {
                RuleItem::Decl(decl) => declarations.push(decl),
                RuleItem::Rule(rule) => children.push(rule),
            }
        }
        let body_slice = input.slice_from(body_start_state.position());
        let body_start = offset_of(self.text, body_slice);
        let body_end = body_start + body_slice.len();

        Ok(RuleItem::Rule(RuleNode {
            prelude,
            declarations,
            children,
            body_span: Span {
                start: body_start,
                end: body_end,
            },
        }))
    }
}

impl<'i> RuleBodyItemParser<'i, RuleItem, ()> for TreeParser<'i> {
    fn parse_declarations(&self) -> bool {
        true
    }

    fn parse_qualified(&self) -> bool {
        true
    }
}

/// Parse `css` (CSS or SCSS — the same nesting-aware grammar covers both)
/// into a span-annotated [`Stylesheet`]. Unparseable top-level items (at
/// rules, malformed statements) are silently skipped, matching the
/// teacher's MVP handling of at-rules; see DESIGN.md.
#[must_use]
pub fn parse(css: &str) -> Stylesheet {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut tree_parser = TreeParser { text: css };
    let mut sheet = Stylesheet::default();
    for item in StyleSheetParser::new(&mut parser, &mut tree_parser).flatten() {
        if let RuleItem::Rule(rule) = item {
            sheet.rules.push(rule);
        }
    }
    sheet
}

/// 1-based line, 0-based column for a byte offset into `text` (spec §3:
/// `DeclarationChange.position`).
#[must_use]
pub fn line_column(text: &str, byte_offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut column = 0u32;
    for ch in text[..byte_offset.min(text.len())].chars() {
        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }
    }
    (line, column)
}
