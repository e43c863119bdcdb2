//! Engine integration tests
//!
//! Drive `Connection` and `Keymaster` end to end with an in-memory
//! connector. Tunnels bind real loopback ports.
//!
//! ```bash
//! cargo test --test engine
//! ```

pub mod fixtures;

mod keymaster_tests;
