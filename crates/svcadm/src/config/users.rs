//! Users file: admins and regular users provisioned into every service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use common::config::{loader, ConfigValidation};
use common::error::ConfigurationError;

use super::validation::{check_password, check_username};

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

/// Admins and regular users, each in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSet {
    pub admins: Vec<User>,
    pub users: Vec<User>,
}

impl UserSet {
    /// Load and validate the users file
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let users: Self = loader::load_data_file(path)?;
        users.validate()?;
        Ok(users)
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty() && self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.admins.len() + self.users.len()
    }
}

impl ConfigValidation for UserSet {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), Self::Error> {
        let mut errors = Vec::new();

        if self.is_empty() {
            errors.push("users file must declare at least one admin or user".to_string());
        }

        let groups = [("admins", &self.admins), ("users", &self.users)];
        for (group, users) in groups {
            for (index, user) in users.iter().enumerate() {
                if let Err(reason) = check_username(&user.username) {
                    errors.push(format!("{group}[{index}].username: {reason}"));
                }
                if let Err(reason) = check_password(&user.password) {
                    errors.push(format!("{group}[{index}].password: {reason}"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::validation_failed(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str, password: &str) -> User {
        User {
            username: username.to_string(),
            password: password.to_string(),
            email: format!("{username}@example.com"),
        }
    }

    #[test]
    fn test_valid_user_set() {
        let users = UserSet {
            admins: vec![user("adm", "hunter22")],
            users: vec![user("developer_01", "correct-horse")],
        };
        assert!(users.validate().is_ok());
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn test_empty_user_set_rejected() {
        assert!(UserSet::default().validate().is_err());
    }

    #[test]
    fn test_all_offending_fields_reported() {
        let users = UserSet {
            admins: vec![user("ab", "hunter22")],
            users: vec![user("developer", " padded ")],
        };

        let err = users.validate().unwrap_err();
        let fields = err.offending_fields();
        assert_eq!(fields.len(), 2);
        assert!(fields[0].starts_with("admins[0].username"));
        assert!(fields[1].starts_with("users[0].password"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", user("adm", "hunter22"));
        assert!(!rendered.contains("hunter22"));
        assert!(rendered.contains("adm"));
    }

    #[test]
    fn test_load_users_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logins.yaml");
        std::fs::write(
            &path,
            "admins:\n  - username: adm\n    password: hunter22\n    email: adm@example.com\nusers: []\n",
        )
        .unwrap();

        let users = UserSet::load(&path).unwrap();
        assert_eq!(users.admins[0].username, "adm");
        assert!(users.users.is_empty());
    }
}
