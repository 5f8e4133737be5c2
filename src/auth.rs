//! Who is asking for an import.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

impl Role {
    /// Unknown role names get the least privilege.
    pub fn from_claim(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Self::Admin,
            "instructor" | "teacher" => Self::Instructor,
            _ => Self::Student,
        }
    }
}

/// Verified identity of the caller, scoped to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn can_import(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Instructor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_claim() {
        assert_eq!(Role::from_claim("Admin"), Role::Admin);
        assert_eq!(Role::from_claim("instructor"), Role::Instructor);
        assert_eq!(Role::from_claim("authenticated"), Role::Student);
    }

    #[test]
    fn test_only_staff_can_import() {
        assert!(Principal::new("u1", Role::Admin).can_import());
        assert!(Principal::new("u1", Role::Instructor).can_import());
        assert!(!Principal::new("u1", Role::Student).can_import());
    }
}
