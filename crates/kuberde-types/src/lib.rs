//! Shared data model for the kuberde fabric: the `AgentIdentity` naming
//! grammar, the `WorkspaceAgent` custom resource, and the cross-cutting
//! error taxonomy used by the Relay Server and the Workspace Operator.

pub mod crd;
pub mod error;
pub mod identity;

pub use crd::{ContainerSpec, RDEAgent, RDEAgentSpec, RDEAgentStatus, StorageEntry, WorkspacePhase};
pub use error::CoreError;
pub use identity::{AgentIdentity, IdentityError};
