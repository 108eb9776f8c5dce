mod broadcast;
mod conversation;
mod envelope;
mod group;
mod ids;
mod presence;
mod resume_token;
mod user;

pub use broadcast::*;
pub use conversation::*;
pub use envelope::*;
pub use group::*;
pub use ids::*;
pub use presence::*;
pub use resume_token::*;
pub use user::*;
