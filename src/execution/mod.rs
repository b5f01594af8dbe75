// Position lifecycle engine
pub mod entry;
pub mod exit;
pub mod filters;
pub mod pacing;
pub mod precision;
pub mod scheduler;
pub mod session;

pub use entry::{EntryController, EntryOutcome};
pub use exit::{ExitController, ExitOutcome};
pub use filters::{is_allowed_lot_size, is_allowed_notional, FilterViolation};
pub use pacing::{Backoff, Pacer};
pub use precision::Precision;
pub use scheduler::{CycleOutcome, CycleScheduler};
pub use session::{CancelOutcome, EngineContext, Session};
