//! Signed request proxy for the Dr. Green API.
//!
//! Browser calls arrive as `POST {action, ...params}`. The router resolves
//! the action from a closed registry, authorizes the caller, signs the
//! upstream call and relays the result.

pub mod actions;
pub mod errors;
pub mod metrics_defs;
mod router;

pub use actions::{Action, ActionKind};
pub use errors::ProxyError;
pub use router::ActionRouter;
