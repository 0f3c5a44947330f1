//! Extensions for std types.
pub mod io;
pub mod mutex;
