//! ipk emission. An ipk is an `ar` archive with exactly three members, in
//! order: `debian-binary`, `control.tar.gz`, `data.tar.gz`. All timestamps,
//! owners and orderings are pinned so two runs over identical inputs yield
//! byte-identical files.

mod control;
mod tarball;

pub use control::{maintainer_scripts, render_control};

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::recipe::{BuildRecipe, Package, Recipe};
use crate::{Error, Result};

const DEBIAN_BINARY: &[u8] = b"2.0\n";

/// Writes the ipk for one staged package into `out_dir` and returns its
/// path, named `<package>_<version>_<arch>.ipk`.
pub fn write_ipk(
    recipe: &Recipe,
    variant: &BuildRecipe,
    package: &Package,
    pkg_dir: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    let mtime = recipe.timestamp.timestamp().max(0) as u64;

    let mut entries = vec![tarball::Entry {
        path: "./control".to_owned(),
        data: control::render_control(recipe, variant, package).into_bytes(),
        mode: 0o644,
    }];
    for (name, body) in control::maintainer_scripts(package) {
        entries.push(tarball::Entry {
            path: format!("./{name}"),
            data: body.into_bytes(),
            mode: 0o755,
        });
    }
    if !package.conffiles.is_empty() {
        entries.push(tarball::Entry {
            path: "./conffiles".to_owned(),
            data: control::render_conffiles(package).into_bytes(),
            mode: 0o644,
        });
    }

    let control_tar = tarball::from_entries(&entries, mtime)
        .map_err(|e| Error::archive_write("control.tar.gz", e))?;
    let data_tar =
        tarball::from_tree(pkg_dir, mtime).map_err(|e| Error::archive_write("data.tar.gz", e))?;

    fs::create_dir_all(out_dir)?;
    let name = format!("{}_{}_{}.ipk", package.name, package.version, variant.arch);
    let path = out_dir.join(&name);
    debug!(artifact = %path.display(), "writing ipk");

    let file = File::create(&path).map_err(|e| Error::archive_write(&name, e))?;
    let mut builder = ar::Builder::new(file);
    append_member(&mut builder, "debian-binary", DEBIAN_BINARY)?;
    append_member(&mut builder, "control.tar.gz", &control_tar)?;
    append_member(&mut builder, "data.tar.gz", &data_tar)?;

    Ok(path)
}

fn append_member(builder: &mut ar::Builder<File>, name: &str, data: &[u8]) -> Result<()> {
    // ar headers default to mtime/uid/gid zero; only the mode is set
    let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
    header.set_mode(0o100644);
    builder
        .append(&header, data)
        .map_err(|e| Error::archive_write(name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{Scriptlets, Version};
    use chrono::{DateTime, Utc};
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use std::os::unix::fs::PermissionsExt;

    fn fixture(timestamp: &str) -> (Recipe, BuildRecipe, Package) {
        let recipe = Recipe {
            name: "tool".into(),
            recipe_dir: "/tmp/tool".into(),
            timestamp: DateTime::parse_from_rfc3339(timestamp)
                .unwrap()
                .with_timezone(&Utc),
            maintainer: "Jane Doe <jane@example.org>".into(),
            url: String::new(),
            license: "MIT".into(),
            sources: Vec::new(),
            checksums: Vec::new(),
            noextract: Vec::new(),
            archs: vec!["rmall".into()],
            variants: Default::default(),
        };
        let variant = BuildRecipe {
            arch: "rmall".into(),
            image: String::new(),
            flags: Vec::new(),
            makedepends: Vec::new(),
            sources: Vec::new(),
            checksums: Vec::new(),
            noextract: Vec::new(),
            prepare: None,
            build: None,
            packages: Vec::new(),
        };
        let package = Package {
            name: "tool".into(),
            version: Version::parse("0.0.1-1").unwrap(),
            description: "A tool".into(),
            section: "utils".into(),
            installdepends: Vec::new(),
            conflicts: Vec::new(),
            replaces: Vec::new(),
            conffiles: Vec::new(),
            package: ":".into(),
            scriptlets: Scriptlets::default(),
        };
        (recipe, variant, package)
    }

    fn stage_tree(root: &Path) {
        fs::create_dir_all(root.join("opt/bin")).unwrap();
        fs::write(root.join("opt/bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(root.join("opt/bin/tool"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn read_members(path: &Path) -> Vec<(String, u64, u32, u32, Vec<u8>)> {
        let mut archive = ar::Archive::new(File::open(path).unwrap());
        let mut members = Vec::new();
        while let Some(entry) = archive.next_entry() {
            let mut entry = entry.unwrap();
            let header = entry.header();
            let name = String::from_utf8_lossy(header.identifier()).into_owned();
            let mtime = header.mtime();
            let uid = header.uid();
            let gid = header.gid();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            members.push((name, mtime, uid, gid, data));
        }
        members
    }

    #[test]
    fn members_in_order_with_zeroed_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("pkg");
        stage_tree(&pkg_dir);

        let (recipe, variant, package) = fixture("2023-06-01T12:00:00Z");
        let path = write_ipk(&recipe, &variant, &package, &pkg_dir, &dir.path().join("out")).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "tool_0.0.1-1_rmall.ipk"
        );

        let members = read_members(&path);
        let names: Vec<_> = members.iter().map(|(n, ..)| n.as_str()).collect();
        assert_eq!(names, ["debian-binary", "control.tar.gz", "data.tar.gz"]);

        for (name, mtime, uid, gid, _) in &members {
            assert_eq!(*mtime, 0, "{name}");
            assert_eq!(*uid, 0, "{name}");
            assert_eq!(*gid, 0, "{name}");
        }
        assert_eq!(members[0].4, b"2.0\n");
    }

    #[test]
    fn data_member_carries_the_staged_tree() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("pkg");
        stage_tree(&pkg_dir);

        let (recipe, variant, package) = fixture("2023-06-01T12:00:00Z");
        let path = write_ipk(&recipe, &variant, &package, &pkg_dir, &dir.path().join("out")).unwrap();

        let members = read_members(&path);
        let mut data = tar::Archive::new(GzDecoder::new(members[2].4.as_slice()));
        let mut seen = Vec::new();
        for entry in data.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            seen.push((
                entry.path().unwrap().to_string_lossy().into_owned(),
                header.mode().unwrap(),
                header.mtime().unwrap(),
            ));
        }
        assert_eq!(
            seen,
            [
                ("./".to_owned(), 0o755, 1685620800),
                ("./opt/".to_owned(), 0o755, 1685620800),
                ("./opt/bin/".to_owned(), 0o755, 1685620800),
                ("./opt/bin/tool".to_owned(), 0o755, 1685620800),
            ]
        );
    }

    #[test]
    fn control_member_contains_scripts_and_conffiles() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("pkg");
        stage_tree(&pkg_dir);

        let (recipe, variant, mut package) = fixture("2023-06-01T12:00:00Z");
        package.scriptlets.postinstall = Some("    echo done".into());
        package.conffiles = vec!["/opt/etc/tool.conf".into()];

        let path = write_ipk(&recipe, &variant, &package, &pkg_dir, &dir.path().join("out")).unwrap();
        let members = read_members(&path);

        let mut control = tar::Archive::new(GzDecoder::new(members[1].4.as_slice()));
        let mut seen = Vec::new();
        for entry in control.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mode = entry.header().mode().unwrap();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            seen.push((path, mode, body));
        }

        assert_eq!(seen[0].0, "./");
        assert_eq!(seen[1].0, "./control");
        assert!(seen[1].2.starts_with("Package: tool\n"));
        assert_eq!(seen[2].0, "./postinst");
        assert_eq!(seen[2].1, 0o755);
        assert_eq!(seen[3].0, "./conffiles");
        assert_eq!(seen[3].2, "/opt/etc/tool.conf\n");
    }

    #[test]
    fn two_runs_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("pkg");
        stage_tree(&pkg_dir);

        let (recipe, variant, package) = fixture("2023-06-01T12:00:00Z");
        let first = write_ipk(&recipe, &variant, &package, &pkg_dir, &dir.path().join("a")).unwrap();
        let second = write_ipk(&recipe, &variant, &package, &pkg_dir, &dir.path().join("b")).unwrap();

        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }
}
