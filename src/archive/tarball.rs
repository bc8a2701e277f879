//! Deterministic gzipped tar construction. Every header field that could
//! leak host state (mtime, owner, names) is pinned here and nowhere else.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use flate2::{Compression, GzBuilder};
use tar::{EntryType, Header};
use walkdir::WalkDir;

/// One in-memory member of a control tarball.
pub struct Entry {
    pub path: String,
    pub data: Vec<u8>,
    pub mode: u32,
}

fn pinned_header(entry_type: EntryType, mode: u32, mtime: u64, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(size);
    header
}

fn gzip(tar: &[u8]) -> io::Result<Vec<u8>> {
    // mtime 0 and no filename field keep the gzip header reproducible
    let mut encoder = GzBuilder::new().mtime(0).write(Vec::new(), Compression::default());
    encoder.write_all(tar)?;
    encoder.finish()
}

/// Builds a gzipped tar from in-memory entries, in the given order, rooted
/// at a `./` directory entry.
pub fn from_entries(entries: &[Entry], mtime: u64) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut root = pinned_header(EntryType::Directory, 0o755, mtime, 0);
    builder.append_data(&mut root, "./", io::empty())?;

    for entry in entries {
        let mut header = pinned_header(EntryType::Regular, entry.mode, mtime, entry.data.len() as u64);
        builder.append_data(&mut header, &entry.path, entry.data.as_slice())?;
    }

    let tar = builder.into_inner()?;
    gzip(&tar)
}

/// Builds a gzipped tar of a file tree, entries sorted lexicographically by
/// path, modes taken from disk (masked to the permission bits), symlinks
/// preserved.
pub fn from_tree(root: &Path, mtime: u64) -> io::Result<Vec<u8>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| io::Error::other("walk stopped on a loop"))
        })?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        paths.push((relative, entry.into_path()));
    }
    paths.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));

    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = pinned_header(EntryType::Directory, 0o755, mtime, 0);
    builder.append_data(&mut dir, "./", io::empty())?;

    for (relative, path) in &paths {
        let meta = fs::symlink_metadata(path)?;
        let mode = permission_bits(&meta);

        if meta.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            let mut header = pinned_header(EntryType::Symlink, 0o777, mtime, 0);
            builder.append_link(&mut header, format!("./{relative}"), target)?;
        } else if meta.is_dir() {
            let mut header = pinned_header(EntryType::Directory, mode, mtime, 0);
            builder.append_data(&mut header, format!("./{relative}/"), io::empty())?;
        } else {
            let mut header = pinned_header(EntryType::Regular, mode, mtime, meta.len());
            builder.append_data(&mut header, format!("./{relative}"), File::open(path)?)?;
        }
    }

    let tar = builder.into_inner()?;
    gzip(&tar)
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}
