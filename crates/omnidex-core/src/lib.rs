//! # omnidex core
//!
//! I/O-free building blocks shared by every omnidex front-end: the
//! document model, deterministic index ids, the content normalizer, sync
//! classification, and the [`IndexStore`](store::IndexStore) abstraction.
//!
//! Nothing in this crate touches the network or the filesystem. Remote
//! sources, SQLite, and the CLI live in the `omnidex` crate.

pub mod diff;
pub mod models;
pub mod normalize;
pub mod store;
