//! Source archive extraction. Every supported format unpacks into a staging
//! directory first; the longest directory chain that is the sole entry at
//! each level is then stripped, so a tarball rooted at `project-1.2/` lands
//! its files directly in `srcdir`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tracing::{debug, trace};
use xz2::read::XzDecoder;

use crate::{Error, Result};

const SUFFIXES: &[&str] = &[".zip", ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tar.xz"];

/// Whether auto-extraction applies to this file name.
pub fn is_extractable(name: &str) -> bool {
    SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Unpacks `archive` into `dest`, strips the common leading directory, and
/// removes the archive file itself.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::extract(archive, "archive has no file name"))?;

    let staging = dest.join(format!(".unpack-{name}"));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;
    debug!(archive = %archive.display(), "extracting source archive");

    let result = if name.ends_with(".zip") {
        unpack_zip(archive, &staging)
    } else {
        unpack_tar(archive, &name, &staging)
    };
    if let Err(e) = result {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    let root = strip_root(&staging)?;
    move_entries(archive, &root, dest)?;

    fs::remove_dir_all(&staging)?;
    fs::remove_file(archive)?;
    Ok(())
}

fn unpack_tar(archive: &Path, name: &str, staging: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let reader: Box<dyn io::Read> = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else if name.ends_with(".tar.bz2") {
        Box::new(BzDecoder::new(file))
    } else if name.ends_with(".tar.xz") {
        Box::new(XzDecoder::new(file))
    } else {
        Box::new(file)
    };

    tar::Archive::new(reader)
        .unpack(staging)
        .map_err(|e| Error::extract(archive, e.to_string()))
}

fn unpack_zip(archive: &Path, staging: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| Error::extract(archive, e.to_string()))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| Error::extract(archive, e.to_string()))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(Error::extract(
                archive,
                format!("entry `{}` escapes the archive root", entry.name()),
            ));
        };
        let out = staging.join(relative);
        trace!(entry = %out.display(), "unpacking");

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut target = File::create(&out)?;
        io::copy(&mut entry, &mut target)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

/// Descends from `staging` while a level holds exactly one directory; every
/// entry of the archive shares that chain as a prefix, so it is the common
/// prefix to strip.
fn strip_root(staging: &Path) -> Result<PathBuf> {
    let mut root = staging.to_path_buf();
    loop {
        let mut entries = fs::read_dir(&root)?;
        let first = match entries.next() {
            Some(entry) => entry?,
            None => return Ok(root),
        };
        if entries.next().is_some() || !first.file_type()?.is_dir() {
            return Ok(root);
        }
        root = first.path();
    }
}

fn move_entries(archive: &Path, root: &Path, dest: &Path) -> Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if target.exists() {
            return Err(Error::extract(
                archive,
                format!("`{}` already exists in the source directory", target.display()),
            ));
        }
        fs::rename(entry.path(), &target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn listing(dir: &Path) -> Vec<String> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(dir).min_depth(1) {
            let entry = entry.unwrap();
            let rel = entry.path().strip_prefix(dir).unwrap();
            out.push(rel.to_string_lossy().into_owned());
        }
        out.sort();
        out
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(name.trim_end_matches('/'), options)
                    .unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut tar = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, name, *data).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn suffix_detection() {
        assert!(is_extractable("a.zip"));
        assert!(is_extractable("a.tar.gz"));
        assert!(is_extractable("a.tgz"));
        assert!(is_extractable("a.tar.bz2"));
        assert!(is_extractable("a.tar.xz"));
        assert!(is_extractable("a.tar"));
        assert!(!is_extractable("a.gz"));
        assert!(!is_extractable("a.c"));
    }

    #[test]
    fn strips_single_root_from_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("src.zip");
        write_zip(
            &archive,
            &[
                ("src-abc/", b"" as &[u8]),
                ("src-abc/Makefile", b"all:"),
                ("src-abc/main.c", b"int main;"),
                ("src-abc/include/", b""),
                ("src-abc/include/x.h", b"#pragma once"),
            ],
        );

        extract(&archive, dir.path()).unwrap();

        assert_eq!(listing(dir.path()), ["Makefile", "include", "include/x.h", "main.c"]);
        assert!(!archive.exists());
    }

    #[test]
    fn keeps_multiple_roots() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("src.tar.gz");
        write_tar_gz(&archive, &[("top/a", b"1"), ("other/b", b"2")]);

        extract(&archive, dir.path()).unwrap();

        assert_eq!(listing(dir.path()), ["other", "other/b", "top", "top/a"]);
    }

    #[test]
    fn strips_nested_common_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("src.tar.gz");
        write_tar_gz(&archive, &[("a/b/x", b"1"), ("a/b/y", b"2")]);

        extract(&archive, dir.path()).unwrap();

        assert_eq!(listing(dir.path()), ["x", "y"]);
    }

    #[test]
    fn single_file_archive_is_left_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("src.tar");
        let file = File::create(&archive).unwrap();
        let mut tar = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_size(1);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, "only", &b"x"[..]).unwrap();
        tar.finish().unwrap();
        drop(tar);

        extract(&archive, dir.path()).unwrap();
        assert_eq!(listing(dir.path()), ["only"]);
    }
}
