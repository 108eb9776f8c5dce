use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque 128-bit token issued at login/signup, held in the Coordinator with
/// a sliding TTL. Authorizes reconnection and delivery of pending messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeToken(pub Uuid);

impl ResumeToken {
    pub fn new() -> Self {
        ResumeToken(Uuid::new_v4())
    }
}

impl Default for ResumeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResumeToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(ResumeToken)
    }
}
