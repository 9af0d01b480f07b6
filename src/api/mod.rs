pub mod portals;
pub mod source;
pub mod types;

pub use portals::{ActivityFeed, PortalsClient, SearchFeed};
pub use source::{ListingSource, SourceError};
pub use types::*;
