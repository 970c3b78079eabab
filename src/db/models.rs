//! Domain records stored in the admin database
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Account primary key, also the principal carried on authenticated requests
    AccountId
);
id_type!(
    /// Registration key primary key
    KeyId
);
id_type!(
    /// Role primary key
    RoleId
);
id_type!(
    /// Issued practice primary key
    PracticeId
);

/// Soft-deletion state of an RBAC primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "at", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    DeletedAt(DateTime<Utc>),
}

impl Lifecycle {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Lifecycle::DeletedAt(_))
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::DeletedAt(at) => Some(*at),
        }
    }
}

impl From<Option<DateTime<Utc>>> for Lifecycle {
    fn from(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(at) => Lifecycle::DeletedAt(at),
            None => Lifecycle::Active,
        }
    }
}

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub key_id: KeyId,
}

/// Person profile attached 1:1 to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub uuid: Uuid,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub account_id: AccountId,
}

/// Derived lifecycle state of a registration key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Active,
    Exhausted,
    Invalidated,
}

/// Registration key record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationKey {
    pub id: KeyId,
    pub role_id: RoleId,
    pub body: String,
    pub max_usages: i32,
    pub current_usages: i32,
    pub created_at: DateTime<Utc>,
    pub group_name: String,
    pub is_valid: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl RegistrationKey {
    pub fn state(&self) -> KeyState {
        if !self.is_valid {
            KeyState::Invalidated
        } else if self.is_exhausted() {
            KeyState::Exhausted
        } else {
            KeyState::Active
        }
    }

    /// Usage has reached the limit; further registrations must be refused
    pub fn is_exhausted(&self) -> bool {
        self.current_usages >= self.max_usages
    }
}

/// RBAC role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub lifecycle: Lifecycle,
}

/// RBAC object (the thing acted upon)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacObject {
    pub id: i64,
    pub name: String,
    pub lifecycle: Lifecycle,
}

/// RBAC action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub name: String,
    pub lifecycle: Lifecycle,
}

/// Binds a role to one object and one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: i64,
    pub role_id: RoleId,
    pub object: RbacObject,
    pub action: Action,
}

impl Permission {
    /// Neither side of the binding has been soft-deleted
    pub fn is_live(&self) -> bool {
        !self.object.lifecycle.is_deleted() && !self.action.lifecycle.is_deleted()
    }
}

/// Practice assignment issued to one or more groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedPractice {
    pub id: PracticeId,
    pub title: String,
    pub target_groups: Vec<String>,
    pub issued_at: DateTime<Utc>,
}

/// Insert payload for a registration key
#[derive(Debug, Clone)]
pub struct NewKey {
    pub role_id: RoleId,
    pub body: String,
    pub max_usages: i32,
    pub group_name: String,
    pub created_at: DateTime<Utc>,
}

/// Partial update for a registration key. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPatch {
    pub current_usages: Option<i32>,
    pub is_valid: Option<bool>,
    pub invalidated_at: Option<DateTime<Utc>>,
    /// Apply only if the stored usage still equals this value, the key is
    /// still valid and the new usage stays within `max_usages`
    pub expected_usages: Option<i32>,
}

impl KeyPatch {
    /// Guarded usage bump from `observed` to `observed + 1`
    pub fn consume(observed: i32) -> Self {
        Self {
            current_usages: Some(observed + 1),
            expected_usages: Some(observed),
            ..Default::default()
        }
    }

    pub fn invalidate(at: DateTime<Utc>) -> Self {
        Self {
            is_valid: Some(false),
            invalidated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current_usages.is_none() && self.is_valid.is_none() && self.invalidated_at.is_none()
    }
}

/// Insert payload for an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub login: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub key_id: KeyId,
}

/// Insert payload for a person
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub uuid: Uuid,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub account_id: AccountId,
}
