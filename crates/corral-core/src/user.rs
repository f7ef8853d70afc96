//! Requester identity and privilege tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Privilege tier of a requester, consulted by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Regular user, subject to the small per-request device cap.
    #[default]
    User,
    /// Administrator, exempt from the per-request device cap.
    Admin,
}

impl Privilege {
    /// Returns true for administrators.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// A reference to the user on whose behalf a lease is held.
///
/// Carried inside `JoinGroup` commands so the device agent knows who
/// owns it, and stored on device records as the `owner` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    email: String,
    name: String,
    privilege: Privilege,
}

impl UserRef {
    /// Create a reference with an explicit privilege tier.
    #[must_use]
    pub fn new(email: impl Into<String>, name: impl Into<String>, privilege: Privilege) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            privilege,
        }
    }

    /// Create a regular-user reference.
    #[must_use]
    pub fn user(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(email, name, Privilege::User)
    }

    /// Create an administrator reference.
    #[must_use]
    pub fn admin(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(email, name, Privilege::Admin)
    }

    /// The user's email address, the identity key for quota accounting.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// The user's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The user's privilege tier.
    #[must_use]
    pub const fn privilege(&self) -> Privilege {
        self.privilege
    }

    /// Returns true if this user is an administrator.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.privilege.is_admin()
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_tiers() {
        assert!(Privilege::Admin.is_admin());
        assert!(!Privilege::User.is_admin());
        assert_eq!(Privilege::default(), Privilege::User);
    }

    #[test]
    fn user_ref_constructors() {
        let user = UserRef::user("a@b.c", "Alice");
        assert_eq!(user.email(), "a@b.c");
        assert_eq!(user.name(), "Alice");
        assert!(!user.is_admin());

        let admin = UserRef::admin("root@b.c", "Root");
        assert!(admin.is_admin());
    }

    #[test]
    fn user_ref_serde_roundtrip() {
        let user = UserRef::admin("a@b.c", "Alice");
        let json = serde_json::to_string(&user).unwrap();
        let parsed: UserRef = serde_json::from_str(&json).unwrap();
        assert_eq!(user, parsed);
    }
}
