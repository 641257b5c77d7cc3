//! Data models

pub mod attempt;
pub mod assessment;
pub mod incident;
pub mod profile;

pub use attempt::*;
pub use assessment::*;
pub use incident::*;
pub use profile::*;
