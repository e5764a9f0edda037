//! Face recognition pipeline: embedding extraction and similarity search.
//!
//! # Architecture
//!
//! - `client`: HTTP client for the external embedding-extraction service
//! - `index`: cosine-distance ranking with per-person de-duplication
//! - `service`: search orchestration (probe image -> vector -> ranked matches)
//! - `ingest`: best-effort embedding attachment for newly created FACE media

pub mod client;
mod index;
pub mod ingest;
mod service;

pub use client::{EmbeddingClient, EmbeddingProvider};
pub use index::{rank, FaceMatch, IndexError};
pub use ingest::{ingest_media_embedding, IngestOutcome};
pub use service::{FaceSearchError, FaceSearchService, SearchParams};
