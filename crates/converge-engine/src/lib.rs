//! Intent lifecycle transitions (`lifecycle`), the per-intent validation
//! pipeline (`validator`), the merge queue processor (`queue`), and the
//! check-execution boundary they share (`checks`).

pub mod checks;
pub mod lifecycle;
pub mod queue;
pub mod validator;

pub use checks::{CheckOutcome, CheckRunner, FixedCheckRunner, SubprocessCheckRunner};
pub use lifecycle::{BlockOutcome, TransitionError};
pub use queue::{process_queue, ProcessQueueParams, QueueCounts};
pub use validator::{validate_intent, ValidationConfig, ValidationOutcome};
