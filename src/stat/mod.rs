pub mod datatype;
pub mod ledger;
pub mod sync;

#[cfg(test)]
pub(crate) mod sample_data;

pub use datatype::*;
pub use ledger::*;
pub use sync::*;
