//! Rate limiting logic and state management.

mod entry;
mod table;

pub use entry::{EntrySnapshot, Quota};
pub use table::LimiterTable;
