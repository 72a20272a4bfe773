//! Long-running operations hosted by a session.
//!
//! - [`supervisor`] -- solver jobs (OS processes).
//! - [`executor`] -- cancellable database queries.

pub mod executor;
pub mod supervisor;

pub use executor::{QueryExecutor, QueryOutcome};
pub use supervisor::{JobOutcome, JobRequest, JobSupervisor};
