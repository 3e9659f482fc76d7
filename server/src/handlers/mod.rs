//! Request handlers for the record endpoints.

mod records;

pub use records::*;
