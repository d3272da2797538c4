//! # reactor-engine
//!
//! The side-effecting half of reactor: it talks to the container engine,
//! drives the per-container state machine, fans workspace commands out
//! across services, and removes container-owned state safely.
//!
//! ## Key Modules
//!
//! *   [`orchestrator`]: `up` / `down` / `state` / `exec` for one container.
//! *   [`workspace`]: Concurrent fan-out of an operation across every service.
//! *   [`cleanup`]: Safety-gated removal with a privileged helper fallback.
//! *   [`runtime`]: The Docker client and an in-memory engine.

// =========================================================================
//  Strict Lints: Safety, Hygiene, and Documentation
// =========================================================================

// 1. Logic & Safety
#![warn(clippy::let_underscore_must_use)] // Don't swallow errors with `let _`
#![warn(clippy::manual_let_else)] // Enforces clean "Guard Clause" style
#![warn(clippy::unwrap_used)] // Force error propagation (no panics)
#![warn(clippy::expect_used)] // Force error propagation

// 2. Numeric Safety
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]

// 3. Observability
#![warn(clippy::print_stderr)] // Ban eprintln! (Use tracing::error!)

// 4. Import Hygiene
#![warn(clippy::wildcard_imports)] // Explicit imports only

// 5. Documentation
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod cleanup;
pub use cleanup::{CleanupError, CleanupGuard, CleanupOutcome, SafetyViolation};
pub mod config_loader;
pub use config_loader::{EnvOverrides, SettingsLoader};
pub mod error;
pub use error::ReactorError;
pub mod logging;
pub mod orchestrator;
pub use orchestrator::{DownOutcome, Orchestrator, Transition, UpOutcome};
pub mod runtime;
pub mod workspace;
pub use workspace::{
    ConfigResolver, DefaultResolver, ServiceFailure, ServiceStatus, WorkspaceEngine,
    WorkspaceReport,
};
