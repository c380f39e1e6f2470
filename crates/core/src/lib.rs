pub mod entry;
pub mod tags;

pub use entry::{Cleared, Entry, KEY_DATE_FORMAT};
pub use tags::{TagSet, TagStore};
