//! # omnidex
//!
//! An incremental search index over documents held in remote systems
//! (GitHub, Google Drive, Disqus, Groups.io).
//!
//! Every remote system is wrapped by a [`DocumentSource`](doctype::DocumentSource)
//! variant that knows how to list items, fetch one item's content, and
//! render a stored record for display. The sync engine compares each
//! listing against the index and fetches only what changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ DocumentSources  │──▶│ Sync engine │──▶│ Index store  │
//! │ gh/gdrive/disqus │   │ classify +  │   │ SQLite FTS5  │
//! │ groupsio         │   │ normalize   │   └──────┬───────┘
//! └──────────────────┘   └─────────────┘          │
//!          ▲                                      ▼
//!   ┌──────┴──────┐                        ┌─────────────┐
//!   │  Registry   │◀───────────────────────│   search    │
//!   │ tag → kind  │     render by tag      │  get/status │
//!   └─────────────┘                        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! omnidex init                   # create database
//! omnidex sources                # check credentials
//! omnidex sync all               # incremental pass over every source
//! omnidex search "release notes" --source-tag github_markdown
//! omnidex status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`doctype`] | `DocumentSource` trait and the seven variants |
//! | [`registry`] | Static tag → variant table |
//! | [`engine`] | Incremental synchronization passes |
//! | [`http`] | Retrying API client shared by the variants |
//! | [`extract`] | Text extraction from binary payloads |
//! | [`sqlite_store`] | SQLite FTS5 index store |
//! | [`search`] | Query-time dispatch |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod doctype;
pub mod engine;
pub mod error;
pub mod extract;
pub mod get;
pub mod http;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod registry;
pub mod search;
pub mod sources;
pub mod sqlite_store;
pub mod status;
pub mod sync_cmd;
