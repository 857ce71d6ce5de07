//! Stylesheet-to-source resolution: URLs (C4), inline source maps (C5), and
//! CSS-module hashed selectors (C6).

pub mod selector_resolver;
pub mod sourcemap;
pub mod url_resolver;
