//! Deterministic tar packing and tree copies for volume export and import.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Pack `source_dir` into a tar file at `dest`. Entries are sorted and
/// ownership and mtimes are zeroed so equal trees produce equal archives.
pub fn pack_dir(source_dir: &Path, dest: &Path) -> io::Result<()> {
    let mut entries = collect_entries(source_dir, source_dir)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let file = BufWriter::new(File::create(dest)?);
    let mut ar = tar::Builder::new(file);
    ar.follow_symlinks(false);

    for (rel_path, full_path) in &entries {
        let ft = match full_path.symlink_metadata() {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("skipping {rel_path}: metadata error: {e}");
                continue;
            }
        };

        if ft.is_file() {
            append_file(&mut ar, rel_path, full_path)?;
        } else if ft.is_dir() {
            append_dir(&mut ar, rel_path, full_path)?;
        } else if ft.is_symlink() {
            append_symlink(&mut ar, rel_path, full_path)?;
        } else {
            warn!("skipping unsupported file type: {rel_path}");
        }
    }

    let mut writer = ar.into_inner()?;
    io::Write::flush(&mut writer)?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Extract a tar file into `target_dir`, creating it if needed.
pub fn unpack_file(archive: &Path, target_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(target_dir)?;
    let mut ar = tar::Archive::new(File::open(archive)?);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(target_dir)
}

/// Read one regular file out of a tar archive without unpacking the rest.
pub fn read_entry(archive: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
    let mut ar = tar::Archive::new(File::open(archive)?);
    for entry in ar.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(name) {
            let mut buf = Vec::new();
            io::Read::read_to_end(&mut entry, &mut buf)?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}

/// Recursively copy a directory tree. Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    fs::set_permissions(dst, src.metadata()?.permissions())?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let ft = entry.file_type()?;
        if ft.is_dir() {
            copy_tree(&from, &to)?;
        } else if ft.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(&from)?, &to)?;
        } else if ft.is_file() {
            fs::copy(&from, &to)?;
        } else {
            warn!("skipping special file {}", from.display());
        }
    }
    Ok(())
}

fn collect_entries(root: &Path, current: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut result = Vec::new();
    if !current.exists() {
        return Ok(result);
    }
    for entry in fs::read_dir(current)? {
        let full = entry?.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| io::Error::other(format!("path strip: {e}")))?
            .to_string_lossy()
            .to_string();

        if full.symlink_metadata()?.is_dir() {
            result.push((rel.clone(), full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> io::Result<tar::Header> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file<W: io::Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> io::Result<()> {
    let data = fs::read(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, rel_path, data.as_slice())
}

fn append_dir<W: io::Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> io::Result<()> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    let path = if rel_path.ends_with('/') {
        rel_path.to_owned()
    } else {
        format!("{rel_path}/")
    };
    ar.append_data(&mut header, &path, &[] as &[u8])
}

fn append_symlink<W: io::Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> io::Result<()> {
    let target = fs::read_link(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, rel_path, &target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/hostname"), "web\n").unwrap();
        std::os::unix::fs::symlink("etc/hostname", root.join("hostname")).unwrap();
    }

    #[test]
    fn pack_then_unpack_restores_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        let tarball = dir.path().join("out.tar");
        pack_dir(&src, &tarball).unwrap();

        let dst = dir.path().join("dst");
        unpack_file(&tarball, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("etc/hostname")).unwrap(), "web\n");
        assert!(dst.join("hostname").symlink_metadata().unwrap().is_symlink());
    }

    #[test]
    fn packing_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        pack_dir(&src, &dir.path().join("a.tar")).unwrap();
        pack_dir(&src, &dir.path().join("b.tar")).unwrap();
        assert_eq!(
            fs::read(dir.path().join("a.tar")).unwrap(),
            fs::read(dir.path().join("b.tar")).unwrap()
        );
    }

    #[test]
    fn read_entry_finds_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        let tarball = dir.path().join("out.tar");
        pack_dir(&src, &tarball).unwrap();

        assert_eq!(
            read_entry(&tarball, "etc/hostname").unwrap().as_deref(),
            Some(b"web\n".as_slice())
        );
        assert!(read_entry(&tarball, "index.json").unwrap().is_none());
    }

    #[test]
    fn copy_tree_copies_files_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        let dst = dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("etc/hostname")).unwrap(), "web\n");
        assert_eq!(
            fs::read_link(dst.join("hostname")).unwrap(),
            PathBuf::from("etc/hostname")
        );
    }
}
