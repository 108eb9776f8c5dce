mod controller;
mod k8s_scaler;
mod settings;

pub use controller::*;
pub use k8s_scaler::*;
pub use settings::*;
