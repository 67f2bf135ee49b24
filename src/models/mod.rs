mod customer;
mod license;

pub use customer::*;
pub use license::*;
