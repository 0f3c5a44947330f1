use crate::types::PackFile;
use std::fs;
use std::io;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

fn find_files(
    root: &Path,
    dir: &Path,
    recursive: bool,
    result: &mut Vec<PackFile>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            result.push(PackFile { path, name });
        } else if recursive && path.is_dir() {
            find_files(root, &path, recursive, result)?;
        }
    }
    Ok(())
}

/// Collect the files to pack from a file or a directory.
///
/// Names are relative to `path` when it is a directory, using `/` separators,
/// and the list is sorted by name.
pub fn collect_pack_files(path: &str, recursive: bool) -> io::Result<Vec<PackFile>> {
    let pa = Path::new(path);
    if pa.is_dir() {
        let mut result = Vec::new();
        find_files(pa, pa, recursive, &mut result)?;
        result.sort_by(|a, b| a.name.cmp(&b.name));
        return Ok(result);
    }
    if pa.is_file() {
        let name = pa
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        return Ok(vec![PackFile {
            path: pa.to_path_buf(),
            name,
        }]);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("Path {} is neither a file nor a directory", pa.display()),
    ))
}

pub fn read_file<F: AsRef<Path> + ?Sized>(f: &F) -> io::Result<Vec<u8>> {
    let mut content = Vec::new();
    if f.as_ref() == Path::new("-") {
        io::stdin().read_to_end(&mut content)?;
    } else {
        content = fs::read(f)?;
    }
    Ok(content)
}

pub fn write_file<F: AsRef<Path> + ?Sized>(f: &F) -> io::Result<Box<dyn Write>> {
    Ok(if f.as_ref() == Path::new("-") {
        Box::new(io::stdout())
    } else {
        Box::new(io::BufWriter::new(fs::File::create(f)?))
    })
}

pub fn make_sure_dir_exists<F: AsRef<Path> + ?Sized>(f: &F) -> io::Result<()> {
    let path = f.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Join an archive member name onto `base`.
///
/// Returns `None` for names that are absolute or climb out of `base`.
pub fn member_output_path(base: &Path, name: &str) -> Option<PathBuf> {
    let name = name.replace('\\', "/");
    let relative = Path::new(&name);
    let mut out = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out == base { None } else { Some(out) }
}
