//! CSS/SCSS parsing, diffing, and patching (C3, C7).

pub mod differ;
pub mod patcher;
pub mod selector;
pub mod tree;
