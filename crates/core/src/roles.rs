//! Well-known role name constants.
//!
//! These must match the `role` claim issued in access tokens.

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";
pub const ROLE_READ_ONLY: &str = "read_only";
