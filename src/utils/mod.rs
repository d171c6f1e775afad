pub mod format;
pub mod listener;
pub mod time;
