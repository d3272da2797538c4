//! Label keys stamped onto every container reactor creates.
//!
//! Labels, not names, are the enumeration key: names can collide or be
//! reused, labels are set once at create time.

/// Present (`"true"`) on every container this tool creates.
pub const MANAGED: &str = "com.reactor.managed";
/// Value of [`MANAGED`].
pub const MANAGED_VALUE: &str = "true";
/// Account the container was named for.
pub const ACCOUNT: &str = "com.reactor.account";
/// `normal` or `discovery`.
pub const MODE: &str = "com.reactor.mode";
/// Workspace hash, on containers started through a workspace.
pub const WORKSPACE: &str = "com.reactor.workspace";
/// Service name within a workspace.
pub const SERVICE: &str = "com.reactor.service";
/// Scope token of a cleanup helper container.
pub const CLEANUP_SCOPE: &str = "com.reactor.cleanup-scope";
