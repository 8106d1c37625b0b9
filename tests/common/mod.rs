#![allow(dead_code)]

//! Common test infrastructure
//!
//! Builds a file-backed duration store in a temporary directory, seeds it
//! with a library and wires mock providers into a resolver and a bulk
//! manager. Tests should only import from this module.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestEnv, StaticProvider};
//!
//! #[tokio::test]
//! async fn test_bulk_run() {
//!     let env = TestEnv::with_album(5);
//!     let manager = env.manager(vec![StaticProvider::agreeing("musicbrainz")]);
//!     manager.start().await.unwrap();
//!     manager.wait_for_completion().await;
//! }
//! ```

mod constants;
mod fixtures;
mod providers;

pub use constants::*;
pub use fixtures::{wait_for_status, TestEnv};
pub use providers::{GatedProvider, HangingProvider, StaticProvider};
