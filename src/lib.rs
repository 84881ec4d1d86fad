#![forbid(unsafe_code)]

//! Core library for the vtarchive tools: a local archive of stream
//! metadata for a set of tracked channels, with tag curation, compound
//! search and a serialized media download pipeline.
//!
//! The binaries under `src/bin` wire these modules to an HTTP API and a
//! cron-style sync job; everything stateful lives in the SQLite archive
//! under the configured archive root.

pub mod config;
pub mod download;
pub mod scan;
pub mod search;
pub mod security;
pub mod settings;
pub mod store;
pub mod sync;
pub mod tokenize;
pub mod ytapi;
