pub mod counter;
pub mod encoding;
pub mod file_type;
pub mod files;
