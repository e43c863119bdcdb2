//! Keymaster: named, toggleable SSH tunnels.
//!
//! Each named entry in the user's ssh config is resolved into a chain of
//! hops, connected outermost-first, and kept up with automatic reconnects.
//! The [`Keymaster`] registry is the entry point for a UI.

pub mod config;
pub mod connection;
pub mod error;
pub mod keymaster;
pub mod logging;
pub mod route;
pub mod ssh;
pub mod tunnel;

pub use connection::{Connection, Phase};
pub use keymaster::{Keymaster, KeymasterEvent};
