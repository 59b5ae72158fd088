//! # blogport
//!
//! Durable, resumable import and export of blog content as portable
//! markdown archives.
//!
//! An **export** renders stored posts into a native zip archive: one
//! directory per post with front matter + markdown, the lossless document
//! tree, and its images. An **import** reads a native archive or any pile
//! of markdown files, relocates their images into blob storage, and
//! inserts the posts, skipping slugs that already exist.
//!
//! Both run as journalled tasks: every step's result is checkpointed, so a
//! task interrupted by a restart resumes where it stopped instead of
//! repeating side effects.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ CLI/HTTP │──▶│ TaskService  │──▶│ workflow (export /   │
//! └──────────┘   └──────┬───────┘   │ import) on StepRunner│
//!                       │           └──────────┬───────────┘
//!                progress polling              │
//!                       ▼                      ▼
//!                ┌────────────┐   ┌────────────────────────┐
//!                │ KV (SQLite)│   │ posts · journal (SQLite)│
//!                └────────────┘   │ blobs (filesystem)      │
//!                                 └────────────────────────┘
//! ```
//!
//! The codecs (archive, front matter, markdown ↔ tree, images) live in the
//! pure `blogport-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite post, status and journal stores |
//! | [`blobs`] | Filesystem blob store |
//! | [`progress`] | Progress records and CLI reporters |
//! | [`workflow`] | Step executor, export and import tasks |
//! | [`service`] | Starting, cancelling and resuming tasks |
//! | [`server`] | HTTP server |

pub mod blobs;
pub mod config;
pub mod db;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod workflow;
