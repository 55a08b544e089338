pub mod error;
pub mod outbox;
pub mod report;
pub mod stat;

pub use error::{Error, Result};
