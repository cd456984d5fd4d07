//! # LiveDoc Testkit
//!
//! Test utilities for LiveDoc.
//!
//! This crate provides:
//! - The `fighter` fixture model, test servers and typed test clients
//! - Push-draining helpers
//! - Property-based test generators using proptest
//! - Fault-injecting and blocking document stores
//! - Fan-out stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use livedoc_testkit::prelude::*;
//! use livedoc_core::{QueryMode, QueryShape};
//! use livedoc_server::Identity;
//!
//! let server = TestServer::new();
//! let mut client = server.client(Identity::anonymous(0));
//! let handle = client.open("fighter", QueryShape::new(), QueryMode::Count).unwrap();
//! assert_eq!(client.results(handle).len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod flaky;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::flaky::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use flaky::*;
pub use generators::*;
pub use stress::*;
