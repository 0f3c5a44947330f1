mod archive;
mod consts;
mod error;
mod index;
mod reader;
mod writer;

pub use archive::{ArchiveItem, Segment};
pub use consts::XP3_MAGIC;
pub use error::Xp3Error;
pub use index::{parse_index, read_index};
pub use writer::{Xp3ArchiveWriter, pack_files, pack_into, should_compress};
