//! Authentication and authorization decisions.

use std::fmt;

use async_trait::async_trait;
use solvergate_core::error::CoreError;
use solvergate_core::layout::validate_name;
use solvergate_core::roles::{ROLE_ADMIN, ROLE_READ_ONLY, ROLE_USER};

use super::jwt::{validate_token, JwtConfig};
use crate::middleware::auth::AuthUser;

/// Operations a caller may be authorized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RunSolver,
    PreprocessFeature,
    StopProcess,
    ListRuns,
    ClearRuns,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RunSolver => "run the solver",
            Self::PreprocessFeature => "preprocess features",
            Self::StopProcess => "stop processes",
            Self::ListRuns => "list runs",
            Self::ClearRuns => "clear the run ledger",
        };
        f.write_str(name)
    }
}

/// Role rules shared by every provider.
///
/// `read_only` may only list runs; clearing the ledger requires `admin`.
pub fn authorize_role(role: &str, operation: Operation) -> Result<(), CoreError> {
    let allowed = match (role, operation) {
        (ROLE_ADMIN, _) => true,
        (ROLE_USER, op) => op != Operation::ClearRuns,
        (ROLE_READ_ONLY, op) => op == Operation::ListRuns,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(CoreError::Forbidden(format!(
            "Role '{role}' is not allowed to {operation}"
        )))
    }
}

/// Decides who a caller is and what they may do.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve the caller from a bearer token.
    async fn authenticate(&self, token: Option<&str>) -> Result<AuthUser, CoreError>;

    /// Check that `user` may perform `operation`.
    async fn authorize(&self, user: &AuthUser, operation: Operation) -> Result<(), CoreError> {
        authorize_role(&user.role, operation)
    }
}

/// HS256 JWT provider.
pub struct JwtAuthProvider {
    config: JwtConfig,
}

impl JwtAuthProvider {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    async fn authenticate(&self, token: Option<&str>) -> Result<AuthUser, CoreError> {
        let token = token.ok_or_else(|| CoreError::Unauthorized("Missing credentials".into()))?;

        let claims = validate_token(token, &self.config)
            .map_err(|_| CoreError::Unauthorized("Invalid or expired token".into()))?;

        // The subject becomes a path component of the user's projects.
        validate_name("User", &claims.sub)
            .map_err(|_| CoreError::Unauthorized("Invalid token subject".into()))?;

        Ok(AuthUser {
            user: claims.sub,
            role: claims.role,
        })
    }
}
