//! Shared domain layer for the feed generator.
//!
//! Everything both services need lives here: the relational store
//! (schema, repositories, migrations), the domain models, the social-graph /
//! taste / fatigue / keyword engines, and the clients for external
//! collaborators (AppView, identity resolver, vector index, embedder,
//! clusterer, keyword extractor).

pub mod clients;
pub mod db;
pub mod error;
pub mod fatigue;
pub mod graph;
pub mod hashing;
pub mod keywords;
pub mod models;
pub mod taste;

pub use error::{CoreError, Result};
