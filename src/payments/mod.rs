//! Payment processor integrations.

mod stripe;

pub use stripe::*;
