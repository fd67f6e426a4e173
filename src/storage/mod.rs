pub mod layout;
pub mod file_lock;
pub mod bitmap;
pub mod base;
pub mod revision;
pub mod block;
pub mod table;
pub mod cursor;
