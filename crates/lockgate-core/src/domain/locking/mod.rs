//! Lock and lock request model
//!
//! The admission core treats locks and requests as identifiers carrying
//! priority, ownership and timestamp metadata. The identity scheme of the
//! protected resource is owned by the backend; only its `release` call is
//! modelled here, through [`LockReleaser`].

pub mod releaser;
pub mod types;

pub use releaser::{InMemoryReleaser, LockReleaser};
pub use types::{Lock, LockRequest, Priority, ResourceIdentifier};
