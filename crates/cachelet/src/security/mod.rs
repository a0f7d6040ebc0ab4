//! Capability-based access control for client requests.
//!
//! - **action**: ActionKind enumeration and ActionSet
//! - **context**: CapabilityRequirement, Grant, CallerContext
//! - **resolver**: PermissionResolver (command tag -> requirement)
//! - **realm**: SecurityRealm (credentials -> CallerContext)

mod action;
mod context;
mod realm;
mod resolver;

pub use action::{ActionKind, ActionSet, UnknownAction};
pub use context::{CallerContext, CapabilityRequirement, Grant, TargetPattern};
pub use realm::{AuthenticationError, SecurityRealm};
pub use resolver::{PermissionResolver, UnknownCommand};
