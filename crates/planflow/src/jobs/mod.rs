pub mod attempts;
pub mod error_codes;
pub mod in_process;
pub mod model;
pub mod outcome;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod timeline;

pub use attempts::AttemptsRepo;
pub use in_process::InProcessScheduler;
pub use model::{Job, JobStatus, NewJob};
pub use outcome::{FailureReason, JobOutcome};
pub use repo::JobsRepo;
pub use retry::RetryPolicy;
pub use scheduler::{JobScheduler, JobTicket, PgJobScheduler};
