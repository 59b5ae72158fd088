//! Document tree ⇄ markdown conversion.
//!
//! [`tree_to_markdown`] walks a [`Node`](crate::document::Node) depth-first
//! and emits CommonMark (with GFM tables and strikethrough).
//! [`markdown_to_tree`] parses markdown back into the same node set.
//! Converting a tree to markdown and back yields an equal tree for
//! everything the schema can express; whitespace and list nesting in
//! hand-written markdown are normalized.

mod parse;
mod render;

pub use parse::markdown_to_tree;
pub use render::{tree_to_markdown, RenderOptions};
