pub mod filter;

pub use filter::{filter_fresh_listings, FilterConfig};
