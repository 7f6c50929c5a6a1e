//! # tenant-rag core
//!
//! Shared, WASM-safe logic for tenant-rag: data models, chunking, the
//! embedding trait, the per-app vector index trait with an in-memory
//! implementation, and retrieval ranking.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod search;

pub use error::{CoreError, CoreResult};
