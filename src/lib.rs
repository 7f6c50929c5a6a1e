//! # tenant-rag
//!
//! A multi-tenant retrieval-augmented generation backend. Each app (tenant)
//! owns an isolated document corpus, a vector index built from it, and a
//! chat operation that answers questions grounded in those documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  upload  ┌──────────────┐  train  ┌──────────────────┐
//! │ CLI/HTTP │─────────▶│ files/<app>  │────────▶│ index/<app>      │
//! └────┬─────┘          └──────────────┘ chunk + │ gen-<uuid>.sqlite│
//!      │                                  embed  └────────┬─────────┘
//!      │ chat        ┌───────────┐   top-k passages       │
//!      └────────────▶│ Generator │◀───────────────────────┘
//!                    │ model or  │
//!                    │ fallback  │
//!                    └───────────┘
//! ```
//!
//! App lifecycle: `CREATED → INDEXING → READY | FAILED`. Only `READY` apps
//! answer chat requests.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | App, document, and answer records |
//! | [`engine`] | Component wiring and app administration |
//! | [`train`] | Training pipeline |
//! | [`chat`] | Retrieval and answering |
//! | [`generate`] | Model-backed and fallback answer generators |
//! | [`embedding`] | Embedding backends |
//! | [`index_manager`] | Per-app index handles |
//! | [`sqlite_index`] | Generation-swapped SQLite vector index |
//! | [`meta`] | App and file metadata store |
//! | [`storage`] | Uploaded document files |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generate;
pub mod http;
pub mod index_manager;
pub mod meta;
pub mod migrate;
pub mod models;
pub mod server;
pub mod sqlite_index;
pub mod storage;
pub mod train;

pub use engine::Engine;
pub use error::{Error, Result};
