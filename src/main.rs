mod args;

use std::io::Write;
use std::path::{Path, PathBuf};
use xp3_tool::COUNTER;
use xp3_tool::formats;
use xp3_tool::types;
use xp3_tool::utils;

fn build_config(arg: &args::Arg) -> types::ExtraConfig {
    types::ExtraConfig {
        xp3_crypt: arg.crypt.clone(),
        xp3_compress_files: arg.xp3_compress_files,
        xp3_compress_index: !arg.xp3_no_compress_index,
        xp3_keep_dirs: arg.xp3_keep_dirs,
        xp3_version: arg.xp3_version,
        zlib_compression_level: arg.zlib_compression_level,
        ..Default::default()
    }
}

pub fn list_archive(
    filename: &str,
    json: bool,
    arg: &args::Arg,
    config: &types::ExtraConfig,
) -> anyhow::Result<()> {
    let archive = formats::open_archive(filename, arg.archive_type.as_ref(), config)?;
    let infos = (0..archive.len())
        .map(|i| archive.entry_info(i))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    for info in infos.iter() {
        println!(
            "{:>10} {:>10} {}{} {}",
            info.size,
            info.packed_size,
            if info.compressed { 'z' } else { '-' },
            if info.encrypted { 'e' } else { '-' },
            info.name
        );
    }
    Ok(())
}

fn extract_member(
    archive: &dyn formats::Archive,
    index: usize,
    out_path: &Path,
) -> anyhow::Result<()> {
    let mut content = archive.open_file(index)?;
    utils::files::make_sure_dir_exists(out_path)?;
    let mut f = utils::files::write_file(out_path)?;
    let copied = std::io::copy(&mut content, &mut f)?;
    f.flush()?;
    if copied != content.size() {
        eprintln!(
            "Warning: {} holds {} bytes, expected {}",
            content.name(),
            copied,
            content.size()
        );
        COUNTER.inc_warning();
    }
    Ok(())
}

pub fn unpack_archive(
    filename: &str,
    output: Option<&str>,
    arg: &args::Arg,
    config: &types::ExtraConfig,
) -> anyhow::Result<()> {
    eprintln!("Unpacking {}", filename);
    let archive = formats::open_archive(filename, arg.archive_type.as_ref(), config)?;
    let out_dir = match output {
        Some(output) => PathBuf::from(output),
        None if filename == "-" => PathBuf::from("."),
        None => {
            let mut pb = PathBuf::from(filename);
            pb.set_extension("");
            pb
        }
    };
    if out_dir.exists() && !out_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Output path {} is not a directory",
            out_dir.display()
        ));
    }
    for (index, name) in archive.iter_archive_filename()?.enumerate() {
        let name = name?;
        let out_path = match utils::files::member_output_path(&out_dir, &name) {
            Some(path) => path,
            None => {
                eprintln!("Skipping member with unsafe name {}", name);
                COUNTER.inc(types::FileResult::Ignored);
                continue;
            }
        };
        match extract_member(archive.as_ref(), index, &out_path) {
            Ok(_) => COUNTER.inc(types::FileResult::Ok),
            Err(e) => {
                eprintln!("Error extracting {}: {}", name, e);
                COUNTER.inc_error();
                if arg.backtrace {
                    eprintln!("Backtrace: {}", e.backtrace());
                }
            }
        }
    }
    Ok(())
}

pub fn pack_archive(
    input: &str,
    output: &str,
    arg: &args::Arg,
    config: &types::ExtraConfig,
) -> anyhow::Result<()> {
    let files = utils::files::collect_pack_files(input, arg.recursive)?;
    if files.is_empty() {
        eprintln!("No files found");
        return Ok(());
    }
    let builder = formats::archive_creator(output, arg.archive_type.as_ref())?;
    let total = files.len();
    builder.create_archive(output, &files, config, &mut |progress| match progress {
        types::PackProgress::AddingFile { index, name } => {
            eprintln!("[{}/{}] Adding {}", index + 1, total, name);
        }
        types::PackProgress::WritingIndex => eprintln!("Writing index"),
        types::PackProgress::CompressingIndex => eprintln!("Compressing index"),
    })?;
    Ok(())
}

fn main() {
    let arg = args::parse_args();
    if arg.backtrace {
        unsafe { std::env::set_var("RUST_LIB_BACKTRACE", "1") };
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cfg = build_config(&arg);
    let (re, print_counter) = match &arg.command {
        args::Command::List { input, json } => (list_archive(input, *json, &arg, &cfg), false),
        args::Command::Unpack { input, output } => {
            (unpack_archive(input, output.as_deref(), &arg, &cfg), true)
        }
        args::Command::Pack { input, output } => (pack_archive(input, output, &arg, &cfg), true),
        args::Command::Schemes => {
            for name in cfg.crypt_registry.names() {
                println!("{}", name);
            }
            println!("xor:<hex byte>");
            (Ok(()), false)
        }
    };
    if let Err(e) = re {
        eprintln!("Error: {}", e);
        if arg.backtrace {
            eprintln!("Backtrace: {}", e.backtrace());
        }
        COUNTER.inc_error();
    }
    if print_counter {
        eprintln!("{}", *COUNTER);
    }
    if COUNTER.errors() > 0 {
        std::process::exit(1);
    }
}
