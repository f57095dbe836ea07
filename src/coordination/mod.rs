//! Session and node coordination
//!
//! - identity resolution and the per-identity process lock
//! - busy flag shared by order operations and teardown
//! - master election across nodes
//! - shutdown requests and ordered teardown

pub mod busy;
pub mod identity;
pub mod node;
pub mod shutdown;
pub mod teardown;

pub use busy::{BusyFlag, BusyGuard};
pub use identity::{resolve_identity, IdentityLock, ResolvedIdentity};
pub use node::{NodeCoordinator, NodeRole};
pub use shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};
pub use teardown::{Teardown, TeardownReport, TeardownStep};
