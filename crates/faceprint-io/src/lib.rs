//! faceprint-io — Collaborators around the embedding pipeline.
//!
//! Image sources, the backend REST client with its session handle and
//! retry policy, ordered fallback chains for identity lookup and embedding
//! persistence, cache invalidation, and HTTP-backed model analyzers.

pub mod backend;
pub mod cache;
pub mod chain;
pub mod local;
pub mod lookup;
pub mod persist;
pub mod remote;
pub mod retry;
pub mod session;
pub mod source;

pub use backend::{BackendClient, BackendConfig, BackendEndpoints, BackendError};
pub use cache::{CacheNotifier, HttpCacheInvalidator};
pub use chain::{ChainError, FallbackChain, Resolved, Strategy, StrategyError, StrategyFailure};
pub use local::{EmbeddingSidecar, LocalEmbeddingStore};
pub use lookup::{IdentityInfo, IdentityLookup, LookupChain, LookupError};
pub use persist::{EmbeddingSink, PersistError, PersistReceipt, PersistRequest, PersistenceChain};
pub use remote::RemoteAnalyzer;
pub use retry::RetryPolicy;
pub use session::{Credentials, SessionHandle};
pub use source::{
    decode_image, DirectoryImageSource, ImageRef, ImageSource, SourceError, DEFAULT_MAX_IMAGE_SIDE,
};
