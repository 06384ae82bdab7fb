//! Domain layer
//!
//! Contains the lock model shared by the deadlock and scheduling engines.

pub mod locking;
