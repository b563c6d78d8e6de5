//! In-memory collaborator implementations used by the integration tests and
//! by the demo CLI in mock mode. Nothing here is durable; state lives only
//! as long as the process.

pub mod builders;
pub mod clock;
pub mod fixtures;
pub mod kanban;
pub mod persistence;
pub mod workspace;

pub use clock::VirtualClock;
pub use kanban::MockKanbanClient;
pub use persistence::InMemoryPersistence;
pub use workspace::MockWorkspace;
