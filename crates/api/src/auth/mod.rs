//! Authentication and authorization primitives.
//!
//! - [`jwt`] -- JWT access-token generation and validation.
//! - [`provider`] -- the [`AuthProvider`] seam consulted by sessions and handlers.

pub mod jwt;
pub mod provider;

pub use provider::{authorize_role, AuthProvider, JwtAuthProvider, Operation};
