pub mod amfi_provider;
pub mod util;

pub use amfi_provider::{AmfiProvider, NavAll, parse_nav_all};
