//! Types, errors and traits shared across the broker client and strategies

pub mod channels;
pub mod errors;
pub mod traits;
pub mod types;
