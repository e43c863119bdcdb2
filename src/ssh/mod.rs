//! SSH transport for keymaster
//!
//! The engine only sees the [`Connector`] and [`Transport`] traits; the
//! russh-backed implementation lives in [`client`].

pub mod auth;
pub mod client;
pub mod handler;
pub mod transport;

pub use client::{RusshConnector, RusshSession};
pub use transport::{Connector, SessionEnd, Transport};
