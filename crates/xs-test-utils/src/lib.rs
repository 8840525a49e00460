//! Shared test utilities for the xswitch workspace.
//!
//! - [`engine::MockLauncher`]: in-process fake engine, scripted per server
//! - [`http`]: mock HTTP proxy responder
//! - [`fixtures`]: catalog and settings builders
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xs_test_utils::{engine::MockLauncher, fixtures};
//!
//! # async fn demo() {
//! let launcher = Arc::new(MockLauncher::new());
//! let settings = fixtures::settings();
//! let (catalog, _subs) = fixtures::catalog(vec![("work", vec![fixtures::server("tokyo", 30)])]);
//! let orchestrator = xs_core::build(&settings, catalog, launcher, Default::default());
//! # let _ = orchestrator;
//! # }
//! ```

pub mod engine;
pub mod fixtures;
pub mod http;

pub use engine::{MockEvent, MockLauncher};
