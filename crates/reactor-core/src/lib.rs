//! # reactor-core
//!
//! `reactor-core` provides the shared types, naming rules, and blueprint
//! construction used across the `reactor` crates (CLI, Engine).
//!
//! ## Architecture
//!
//! ```mermaid
//! graph TD
//!     CLI[reactor-cli] -->|Uses| Engine[reactor-engine]
//!     CLI -->|Uses| Core[reactor-core]
//!     Engine -->|Uses| Core
//!
//!     Core --> Identity[Identity]
//!     Core --> Blueprint[Blueprint]
//!     Core --> Runtime[Runtime Trait]
//!     Core --> Workspace[Workspace Schema]
//! ```
//!
//! ## Key Modules
//!
//! *   [`identity`]: Deterministic container names and workspace hashes.
//! *   [`blueprint`]: Turns a [`ResolvedConfig`] plus mount/port intent into a [`ContainerBlueprint`].
//! *   [`runtime`]: The capability trait every container engine client implements.
//! *   [`workspace`]: Defines the `reactor-workspace.yml` schema and its validation rules.
//!
//! ## Entry Points
//!
//! *   **Naming a container**: Start with [`NameScheme`].
//! *   **Describing a container**: Use [`BlueprintBuilder`].
//! *   **Loading a workspace**: See [`Workspace::parse`].

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
#![warn(clippy::shadow_unrelated)]

// 5. Documentation
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod blueprint;
#[doc(inline)]
pub use blueprint::{BlueprintBuilder, ContainerBlueprint};
pub mod config;
#[doc(inline)]
pub use config::{MountKind, MountSpec, PortMapping, ResolvedConfig, Settings, Timeouts};
pub mod identity;
#[doc(inline)]
pub use identity::{NameScheme, RunMode};
pub mod labels;
pub mod runtime;
#[doc(inline)]
pub use runtime::{ContainerRuntime, ExecOutput, RuntimeError};
pub mod state;
#[doc(inline)]
pub use state::{ContainerInfo, ContainerState};
pub mod workspace;
#[doc(inline)]
pub use workspace::{Service, Workspace, WorkspaceError};
