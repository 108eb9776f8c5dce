mod fabric;

pub use fabric::*;
