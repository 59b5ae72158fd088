//! # Blogport Core
//!
//! Runtime-free logic of the blog import/export pipeline: the archive
//! codec, the document tree and its markdown converter, front-matter
//! normalization, image relocation, post discovery, data models, and the
//! storage collaborator traits.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The `blogport`
//! crate supplies the native backends, the durable step executor, and the
//! workflows built on top of these pieces.
//!
//! | Module | Role |
//! |--------|------|
//! | [`archive`] | path-addressed zip container |
//! | [`document`] | rich-text document tree |
//! | [`markdown`] | tree ⇄ markdown |
//! | [`frontmatter`] | metadata block parsing and dialect mapping |
//! | [`images`] | image reference discovery and rewriting |
//! | [`relocate`] | uploading archive images to the blob store |
//! | [`entries`] | post discovery in an archive |
//! | [`models`] | posts, tags, progress, reports |
//! | [`store`] | collaborator traits and in-memory backends |

pub mod archive;
pub mod document;
pub mod entries;
pub mod frontmatter;
pub mod images;
pub mod markdown;
pub mod models;
pub mod relocate;
pub mod store;
