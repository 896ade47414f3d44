// 👤 Owner - who a device or record belongs to
//
// Stored as a nullable user_id column: NULL means shared.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    /// Owned by a single user account.
    User(i64),
    /// Visible to (and editable by) everyone.
    Shared,
}

impl Owner {
    /// Build from the nullable `user_id` column.
    pub fn from_user_id(user_id: Option<i64>) -> Self {
        match user_id {
            Some(id) => Owner::User(id),
            None => Owner::Shared,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::Shared => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Owner::Shared)
    }

    /// Whether `caller` may modify something owned by `self`.
    pub fn permits(&self, caller: Owner) -> bool {
        self.is_shared() || *self == caller
    }
}

impl From<Owner> for SqlValue {
    fn from(owner: Owner) -> Self {
        SqlValue::from(owner.user_id())
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::User(id) => write!(f, "user #{}", id),
            Owner::Shared => write!(f, "shared"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_from_user_id() {
        assert_eq!(Owner::from_user_id(Some(4)), Owner::User(4));
        assert_eq!(Owner::from_user_id(None), Owner::Shared);
        assert_eq!(Owner::User(4).user_id(), Some(4));
        assert_eq!(SqlValue::from(Owner::Shared), SqlValue::Null);
    }

    #[test]
    fn test_owner_permits() {
        // Shared is editable by anyone
        assert!(Owner::Shared.permits(Owner::User(1)));
        assert!(Owner::Shared.permits(Owner::Shared));

        // User-owned only by that user
        assert!(Owner::User(1).permits(Owner::User(1)));
        assert!(!Owner::User(1).permits(Owner::User(2)));
        assert!(!Owner::User(1).permits(Owner::Shared));
    }
}
