use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! int_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map($name)
            }
        }
    };
}

int_id!(UserId);
int_id!(SessionId);
int_id!(ConversationId);
int_id!(MessageId);
int_id!(BroadcastMessageId);
int_id!(GroupId);
int_id!(GroupMessageId);

/// Canonical, order-independent pair of users. `getOrCreateConversation(a,b)` and
/// `getOrCreateConversation(b,a)` must resolve to the same conversation, so the
/// pair is always stored with the smaller id first.
pub struct UserPair(UserId, UserId);

impl UserPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a.0 < b.0 { Self(a, b) } else { Self(b, a) }
    }

    pub fn lo(&self) -> UserId {
        self.0
    }

    pub fn hi(&self) -> UserId {
        self.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_pair_is_order_independent() {
        let forward = UserPair::new(UserId(3), UserId(7));
        let backward = UserPair::new(UserId(7), UserId(3));
        assert_eq!(forward.lo(), backward.lo());
        assert_eq!(forward.hi(), backward.hi());
        assert_eq!(forward.lo(), UserId(3));
        assert_eq!(forward.hi(), UserId(7));
    }

    #[test]
    fn user_pair_handles_equal_ids() {
        let pair = UserPair::new(UserId(5), UserId(5));
        assert_eq!(pair.lo(), UserId(5));
        assert_eq!(pair.hi(), UserId(5));
    }

    #[test]
    fn id_from_str_round_trips_through_display() {
        let id = GroupId(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<GroupId>().unwrap(), id);
        assert!("not-a-number".parse::<GroupId>().is_err());
    }
}
