//! # Defect Harness
//!
//! A local mirror of an ALM defect tracker with fast offline querying.
//!
//! Defect Harness pulls every defect from the ALM REST API, normalizes the
//! field-bag records (stripping HTML from rich-text fields), and publishes
//! them as an immutable *generation*: a JSON snapshot plus a SQLite database
//! with an FTS5 index. Queries, the CLI and the dashboard API always read
//! the current generation through stable symlink aliases.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  ALM REST   │──▶│  Normalize  │──▶│  Generation  │
//! │  (paged)    │   │ fields+HTML │   │ JSON+SQLite  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ defects.db alias
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │  (alm)   │         │   API    │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pbpaste | alm config import-curl   # cookies + project from DevTools
//! alm sync                           # fetch and publish a generation
//! alm list --status open --priority P1-Critical
//! alm search "invoice total"
//! alm stats
//! alm serve                          # dashboard API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Wire types, defect record, sync metadata |
//! | [`normalize`] | Raw entity → defect mapping, HTML stripping |
//! | [`alm_client`] | REST client and paginated fetch |
//! | [`progress`] | Sync progress reporting |
//! | [`store`] | Generation publishing and data-dir layout |
//! | [`schema`] | Table, FTS index, and schema docs |
//! | [`db`] | Database connections |
//! | [`filter`] | Get, list, and count |
//! | [`search`] | Full-text search |
//! | [`stats`] | Aggregate statistics |
//! | [`sql`] | Ad-hoc read-only SQL |
//! | [`ingest`] | Sync orchestration |
//! | [`curl`] | Config bootstrap from a curl command |
//! | [`get`] | Text rendering of defects |
//! | [`server`] | Dashboard HTTP API |

pub mod alm_client;
pub mod config;
pub mod curl;
pub mod db;
pub mod filter;
pub mod get;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod schema;
pub mod search;
pub mod server;
pub mod sql;
pub mod stats;
pub mod store;
