pub mod catalog;
pub mod constants;
pub mod error;
pub mod types;

pub use catalog::{CaseStore, StaticCaseStore};
pub use constants::*;
pub use error::GatewayError;
pub use types::*;
