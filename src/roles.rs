//! Caller roles and the confidentiality capability predicate.
//!
//! Every confidentiality decision in the system goes through
//! [`UserRole::can_view_confidential`] so the search filter and the
//! single-record access check cannot drift apart.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Role assigned to an authenticated user by the upstream identity layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    AdminGeral,
    Gestor,
    PontoFocal,
    Usuario,
}

impl UserRole {
    /// Whether this role may see confidential people and their media.
    pub fn can_view_confidential(&self) -> bool {
        matches!(
            self,
            UserRole::AdminGeral | UserRole::Gestor | UserRole::PontoFocal
        )
    }
}

impl Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserRole::AdminGeral => "ADMIN_GERAL",
            UserRole::Gestor => "GESTOR",
            UserRole::PontoFocal => "PONTO_FOCAL",
            UserRole::Usuario => "USUARIO",
        };
        write!(f, "{s}")
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ADMIN_GERAL" => Ok(UserRole::AdminGeral),
            "GESTOR" => Ok(UserRole::Gestor),
            "PONTO_FOCAL" => Ok(UserRole::PontoFocal),
            "USUARIO" => Ok(UserRole::Usuario),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Identity of the caller performing an operation, as asserted by the
/// upstream gateway. The core only ever consults the role's capability.
#[derive(Clone, Copy, Debug)]
pub struct CallerContext {
    pub user_id: u64,
    pub role: UserRole,
}

impl CallerContext {
    pub fn new(user_id: u64, role: UserRole) -> Self {
        Self { user_id, role }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_roles_see_confidential() {
        assert!(UserRole::AdminGeral.can_view_confidential());
        assert!(UserRole::Gestor.can_view_confidential());
        assert!(UserRole::PontoFocal.can_view_confidential());
        assert!(!UserRole::Usuario.can_view_confidential());
    }

    #[test]
    fn test_role_parse_roundtrip() {
        for role in [
            UserRole::AdminGeral,
            UserRole::Gestor,
            UserRole::PontoFocal,
            UserRole::Usuario,
        ] {
            assert_eq!(role.to_string().parse::<UserRole>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_parse_case_insensitive() {
        assert_eq!("gestor".parse::<UserRole>().unwrap(), UserRole::Gestor);
        assert_eq!(
            " usuario ".parse::<UserRole>().unwrap(),
            UserRole::Usuario
        );
    }

    #[test]
    fn test_role_parse_unknown() {
        assert!("SUPERADMIN".parse::<UserRole>().is_err());
        assert!("".parse::<UserRole>().is_err());
    }
}
