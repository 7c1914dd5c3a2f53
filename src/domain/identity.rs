use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated(UserId),
}

impl Identity {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated(id) => Some(*id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated(_))
    }

    /// Value echoed to the gateway in metadata and idempotency keys.
    pub fn label(&self) -> String {
        match self {
            Identity::Anonymous => "guest".to_string(),
            Identity::Authenticated(id) => id.to_string(),
        }
    }
}

/// Account details the commerce core needs about a registered customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub user_id: UserId,
    pub email: Option<String>,
    /// Eligible for the one-off first order discount.
    pub first_time_buyer: bool,
}

impl Customer {
    pub fn new(user_id: UserId, email: Option<String>) -> Self {
        Self {
            user_id,
            email,
            first_time_buyer: true,
        }
    }

    /// Consumes the first-time discount. Returns `true` only when it was still available.
    pub fn consume_first_time_discount(&mut self) -> bool {
        std::mem::replace(&mut self.first_time_buyer, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_label() {
        assert_eq!(Identity::Anonymous.label(), "guest");
        assert_eq!(Identity::Authenticated(UserId(7)).label(), "7");
    }

    #[test]
    fn test_first_time_discount_consumed_once() {
        let mut customer = Customer::new(UserId(1), None);
        assert!(customer.consume_first_time_discount());
        assert!(!customer.consume_first_time_discount());
        assert!(!customer.first_time_buyer);
    }
}
