//! Client side of the Dr. Green API: request signing, the signed HTTP
//! client and the strain detail cache shared by the proxy and the
//! synchronizer.

pub mod cache;
pub mod client;
pub mod config;
pub mod metrics_defs;
pub mod signer;

pub use cache::StrainCache;
pub use client::{DrGreenClient, DrGreenError, SignedPart, UpstreamRequest, UpstreamResponse};
pub use config::{CacheConfig, SigningConfig, UpstreamConfig};
pub use signer::{Credentials, Signer, SigningError, SigningScheme};
