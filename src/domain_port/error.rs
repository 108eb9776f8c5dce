/// Input-validation / domain errors surfaced to the client verbatim as
/// `<CODE>:<human message>` lines (see wire protocol, §7 error taxonomy).
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Username already exists")]
    NameTaken,
    #[error("Invalid username or password")]
    BadCredentials,
    #[error("Group name already exists")]
    GroupNameTaken,
    #[error("Group not found or inactive")]
    GroupNotFound,
    #[error("You are not a member of this group")]
    NotAMember,
    #[error("You are already a member of this group")]
    AlreadyMember,
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        PersistenceError::Store(e.to_string())
    }
}

impl From<redis::RedisError> for CoordinatorError {
    fn from(e: redis::RedisError) -> Self {
        CoordinatorError::Store(e.to_string())
    }
}
