//! # xfi_config
//!
//! Archetype, rule, and exemption resolution for x-fidelity.
//!
//! Resolution precedence, highest first: remote config server > local
//! config directory > built-in default. Remote access goes through a
//! hardened HTTP client (scheme and host checks, private-address refusal,
//! disabled redirects, response size caps, retry with exponential backoff).
//! Local access validates the config directory against an allow-list of
//! base directories before any file is read.
//!
//! Resolved configurations are cached per archetype name for the lifetime
//! of the resolver and are read-only afterwards.

mod error;
mod http;
mod repo_config;
mod resolver;
pub mod security;

pub use error::ConfigError;
pub use http::RemoteConfigClient;
pub use repo_config::load_repo_config;
pub use resolver::{ConfigResolver, ConfigSource, ResolvedConfig, ResolverOptions};
