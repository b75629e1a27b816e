//! Sketchsync View
//!
//! The view side of the sync protocol:
//! - [`Replica`]: a view's local, eventually consistent projection of a
//!   document, including the stroke being drawn and optimistic strokes
//! - [`ViewClient`]: drives a replica over a TCP link to the authority

pub mod client;
pub mod error;
pub mod replica;

pub use client::ViewClient;
pub use error::{Result, ViewError};
pub use replica::{PendingRequest, Phase, Replica, ReplicaEvent};
