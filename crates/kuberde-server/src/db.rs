//! The relational database is an external collaborator (spec §1
//! Non-goals: "does not persist application state"). The core still
//! needs a readiness signal ("readyz OK only when the database is
//! reachable", spec §4.1), so this models that dependency behind a
//! narrow trait rather than embedding a real database client — the
//! concrete implementation lives in the out-of-scope application layer
//! that owns the schema.

use std::sync::Arc;

#[async_trait::async_trait]
pub trait DbHealth: Send + Sync {
    async fn ping(&self) -> bool;
}

/// Stand-in used when no application-layer database client is wired
/// in (e.g. this binary run standalone). Always reports healthy so the
/// core's own tests aren't coupled to a real database.
pub struct AlwaysHealthy;

#[async_trait::async_trait]
impl DbHealth for AlwaysHealthy {
    async fn ping(&self) -> bool {
        true
    }
}

pub fn default_handle() -> Arc<dyn DbHealth> {
    Arc::new(AlwaysHealthy)
}
