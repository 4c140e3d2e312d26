pub mod config;
pub mod translate;

pub use config::*;
pub use translate::*;
