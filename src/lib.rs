//! A Rust library for listing, unpacking and packing Kirikiri XP3 archives.
pub mod ext;
pub mod formats;
pub mod types;
pub mod utils;

lazy_static::lazy_static! {
    pub static ref COUNTER: utils::counter::Counter = utils::counter::Counter::new();
}
