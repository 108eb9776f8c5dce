mod coordinator_fake;
mod persistence_fake;

pub use coordinator_fake::*;
pub use persistence_fake::*;
