//! Clients for external collaborators.
//!
//! Every dependency here is opaque to the ranking logic: the AppView (post
//! hydration, likers, profiles, follows), the identity resolver, the
//! cosine-distance ANN store, and the embedder / clusterer /
//! keyword-extractor CLIs. All calls carry timeouts and all failures are
//! surfaced as `CoreError::External` so pipeline steps can degrade to empty
//! results.

pub mod appview;
pub mod clusterer;
pub mod embedder;
pub mod extractor;
pub mod identity;
pub mod vector;

pub use appview::AppViewClient;
pub use clusterer::ClustererClient;
pub use embedder::EmbedderClient;
pub use extractor::KeywordExtractorClient;
pub use identity::IdentityClient;
pub use vector::VectorIndexClient;
