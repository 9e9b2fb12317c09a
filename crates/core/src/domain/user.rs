// User Domain Model (balance ledger collaborator)

use serde::{Deserialize, Serialize};

/// User ID (database serial)
pub type UserId = i64;

/// Account holder with a non-negative balance in minor units (cents)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub balance: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    /// Balance after applying `delta`, or `None` if it would go negative
    /// (or overflow).
    pub fn balance_after(&self, delta: i64) -> Option<i64> {
        self.balance.checked_add(delta).filter(|b| *b >= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(balance: i64) -> User {
        User {
            id: 1,
            balance,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_balance_after() {
        assert_eq!(user(100).balance_after(-40), Some(60));
        assert_eq!(user(100).balance_after(-100), Some(0));
        assert_eq!(user(100).balance_after(-101), None);
        assert_eq!(user(100).balance_after(0), Some(100));
        assert_eq!(user(i64::MAX).balance_after(1), None);
    }
}
