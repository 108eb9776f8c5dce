use super::{SessionId, UserId};
use chrono::{DateTime, Utc};

/// Created on signup; immutable thereafter save for session bookkeeping.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A durable login/logout record, distinct from the ephemeral `ResumeToken`
/// held in the Coordinator. Closed on clean logout, left open on crash/EOF.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub login_time: DateTime<Utc>,
    pub logout_time: Option<DateTime<Utc>>,
    pub active: bool,
}

pub fn hash_password(password: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_password_is_deterministic_sha256_hex() {
        let a = hash_password("hunter2");
        let b = hash_password("hunter2");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_password("hunter3"));
    }
}
