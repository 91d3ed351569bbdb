//! Synchronization jobs between the Dr. Green API and the local store.

pub mod api;
pub mod clients;
pub mod errors;
pub mod fields;
pub mod metrics_defs;
pub mod rehome;
pub mod strains;

pub use api::{Job, SyncApi};
pub use clients::{ClientSync, ClientSyncOptions, ClientSyncReport};
pub use errors::SyncError;
pub use rehome::{RehomeConfig, RehomeOptions, RehomeReport, Rehomer};
pub use strains::{StrainSync, StrainSyncOptions, StrainSyncReport};
