use clap::{ArgAction, Parser, Subcommand};
use xp3_tool::types::*;

/// Tools for listing, unpacking and packing Kirikiri XP3 archives
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Arg {
    #[arg(short = 't', long, value_enum, global = true)]
    /// Archive type
    pub archive_type: Option<ArchiveType>,
    #[arg(long, global = true)]
    /// Cipher scheme of encrypted entries. Run `schemes` to list them.
    pub crypt: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    /// Compress file contents when packing
    pub xp3_compress_files: bool,
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    /// Store the directory without compression when packing
    pub xp3_no_compress_index: bool,
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    /// Keep relative directory paths in member names when packing
    pub xp3_keep_dirs: bool,
    #[arg(long, value_enum, global = true, default_value_t = Xp3Version::V1)]
    /// XP3 header version to write
    pub xp3_version: Xp3Version,
    #[arg(
        long,
        global = true,
        default_value_t = 9,
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    /// Zlib compression level
    pub zlib_compression_level: u32,
    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    /// Search for files in the directory recursively when packing
    pub recursive: bool,
    #[arg(global = true, action = ArgAction::SetTrue, short, long)]
    /// Print backtrace on error
    pub backtrace: bool,
    #[command(subcommand)]
    /// Command
    pub command: Command,
}

#[derive(Subcommand, Debug)]
/// Commands
pub enum Command {
    /// List the members of an archive
    List {
        /// Input archive, or - for stdin
        input: String,
        #[arg(long, action = ArgAction::SetTrue)]
        /// Print the listing as JSON
        json: bool,
    },
    /// Extract every member of an archive
    Unpack {
        /// Input archive, or - for stdin
        input: String,
        /// Output directory
        output: Option<String>,
    },
    /// Build an archive from a file or a directory
    Pack {
        /// Input file or directory
        input: String,
        /// Output archive
        output: String,
    },
    /// List the available cipher schemes
    Schemes,
}

pub fn parse_args() -> Arg {
    Arg::parse()
}
