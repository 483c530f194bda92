pub mod config;
pub mod error;
pub mod types;

pub use config::KagConfig;
pub use error::{Endpoint, KagError, Result};
pub use types::*;
