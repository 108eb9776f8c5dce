mod gateway;
mod tx;
mod util;

pub use gateway::*;
pub use tx::*;
pub use util::*;
