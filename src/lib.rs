//! Discload: Discogs dump to relational database pipeline
//!
//! Converts the multi-gigabyte Discogs XML exports (labels, artists, masters,
//! releases) into a normalized SQLite schema of entities and their
//! many-to-many relationships.
//!
//! # Architecture
//!
//! The pipeline is a sequence of streaming passes:
//!
//! - **Streaming parse** -- Never loads a full dump; one matched element
//!   subtree is held at a time, whatever the file size
//! - **Dependency ordering** -- Names are loaded in one pass, relationships in
//!   later passes over the same file, so every reference resolves against
//!   entities that already exist
//! - **Batched commits** -- The open transaction is committed and the store's
//!   entity cache dropped every N accepted facts
//! - **Name resolution** -- Case-insensitive, trimmed name keys with
//!   deduplication and self-reference filtering
//!
//! Stages run `labels → artists → masters → releases`; masters come before
//! releases so that release rows derived from a master exist before
//! standalone releases and release relationships are read.
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML reader with gzip/bzip2 decompression
//! - [`process`] -- Per-fact extraction rules
//! - [`resolve`] -- Name normalization, lookup and self-exclusion
//! - [`batch`] -- Commit-every-N batched sink
//! - [`pipeline`] -- Stage/pass orchestration and dump discovery
//! - [`store`] -- Storage trait the pipeline writes through
//! - [`db`] -- SQLite store and schema administration
//! - [`models`] -- Entity types and name normalization
//! - [`stats`] -- Per-pass counters
//! - [`config`] -- Defaults and tuning constants
//!
//! # Example Usage
//!
//! ```bash
//! # Create tables, then load everything from ./data/discogs_20130601_*.xml
//! discload db create --database discogs.sqlite3
//! discload import --all --data-dir data --date 20130601 --commit-rate 5000
//!
//! # Load only label hierarchy from an existing names load
//! discload import --parent-labels --sublabels
//! ```

pub mod batch;
pub mod config;
pub mod db;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod process;
pub mod resolve;
pub mod stats;
pub mod store;
