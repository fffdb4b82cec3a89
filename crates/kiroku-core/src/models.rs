pub mod list;
pub mod media;

pub use list::{ListDiff, ListItemRow, StagedInsert, UserList};
pub use media::{Episode, IdResult, ItemKey, ItemKind, Movie, Person, Season, Show};
