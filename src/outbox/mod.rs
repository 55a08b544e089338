//! Best-effort delivery of rendered statements. Failures here are reported
//! but never touch the ledger.

pub mod archive;
pub mod mail;

pub use archive::*;
pub use mail::*;
