pub mod config;
pub mod input_loader;
pub mod logger;
pub mod profile;
pub mod profile_cache;
pub mod profile_parser;
pub mod resolver;
pub mod session_client;

// Exporting types for convenience
pub use config::EngineConfig;
pub use input_loader::PersonRecord;
pub use profile::{Address, Profile, Query};
pub use profile_cache::{CacheError, FlushPolicy, ProfileCache};
pub use profile_parser::{DetailExtraction, Extraction, ProfileParser};
pub use resolver::{Lookup, MissReason, Resolver, Stage};
pub use session_client::{FetchError, HttpTransport, RetryPolicy, SessionClient, Transport, TransportError};
