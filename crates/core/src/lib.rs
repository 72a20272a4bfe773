//! Domain logic for the solvergate session/job orchestration layer.
//!
//! Everything here is free of database access: the error taxonomy, the
//! tagged identifiers and frame statuses of the session protocol, the Run
//! Ledger, the project layout provider, and the process supervisor backends
//! used to spawn and watch the external solver.

pub mod error;
pub mod layout;
pub mod ledger;
pub mod process;
pub mod protocol;
pub mod roles;
pub mod types;
