// ABOUTME: Clone engine composed of guard, schema, copier and routine stages
// ABOUTME: CloneSession drives the stages and streams CloneEvents to subscribers

pub mod copier;
pub mod events;
pub mod guard;
pub mod routines;
pub mod schema;
pub mod session;

pub use copier::{BatchCopyResult, BatchRowCopier, CopyStatus, BATCH_SIZE};
pub use events::{CloneEvent, EventEmitter, WireMessage};
pub use guard::ReadOnlyGuard;
pub use routines::{strip_definer, RoutineReplicator};
pub use schema::{normalize_collations, SchemaReplicator};
pub use session::{CloneResult, CloneRunner, CloneSession, SessionState};
