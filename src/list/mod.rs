mod error;
mod model;
mod sync;

pub use error::SyncError;
pub use model::{newest_first, ListItem, NewListItem};
pub use sync::{ListState, ListSynchronizer, LiveUpdates, SyncStatus};
