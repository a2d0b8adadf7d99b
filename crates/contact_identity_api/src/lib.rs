//! Caller-facing entry points over `contact_identity_core`.

pub mod api;
pub mod config;

pub use api::{
    cluster, cluster_with, identify, identify_with, init_logging_from, options_from,
    IdentifyRequest, IdentifyResponse, ResponseStatus,
};
pub use config::IdentityConfig;
