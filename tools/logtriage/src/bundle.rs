//! Safe extraction of `.tar.gz` triage bundles.
//!
//! A bundle holds one top-level host directory. Every entry is checked before
//! it is written: absolute paths, `..` components and links that point out of
//! the extraction root fail the whole extraction. The extracted tree lives in
//! a temporary directory that is removed when the [`ExtractedBundle`] drops.

use crate::errors::TriageError;
use crate::logging::append_run_log;
use flate2::read::GzDecoder;
use serde_json::json;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tempfile::TempDir;

#[derive(Debug)]
pub struct ExtractedBundle {
    _workspace: TempDir,
    pub root: PathBuf,
    pub hostdir: String,
    pub entry_count: usize,
}

pub fn extract_bundle(bundle: &Path) -> Result<ExtractedBundle, TriageError> {
    if !bundle.is_file() {
        return Err(TriageError::MissingInput(format!(
            "bundle not found: {}",
            bundle.display()
        )));
    }
    let workspace = tempfile::Builder::new()
        .prefix("logtriage-")
        .tempdir()
        .map_err(|e| TriageError::Io(e.to_string()))?;

    append_run_log(
        "info",
        "bundle.extract.started",
        json!({
            "bundle": bundle.display().to_string(),
            "workspace": workspace.path().display().to_string(),
        }),
    );

    let file = File::open(bundle).map_err(|e| TriageError::Io(e.to_string()))?;
    let entry_count = match unpack_checked(GzDecoder::new(file), workspace.path()) {
        Ok(count) => count,
        Err(err) => {
            append_run_log(
                "error",
                "bundle.extract.failed",
                json!({
                    "bundle": bundle.display().to_string(),
                    "error": err.to_string(),
                }),
            );
            return Err(err);
        }
    };

    let root = host_directory(workspace.path())?;
    let hostdir = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    append_run_log(
        "info",
        "bundle.extract.completed",
        json!({
            "bundle": bundle.display().to_string(),
            "hostdir": hostdir,
            "entry_count": entry_count,
        }),
    );

    Ok(ExtractedBundle {
        _workspace: workspace,
        root,
        hostdir,
        entry_count,
    })
}

/// Unpacks a tar stream into `dest`, rejecting any entry that would land
/// outside of it.
pub fn unpack_checked<R: std::io::Read>(reader: R, dest: &Path) -> Result<usize, TriageError> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| TriageError::Archive(e.to_string()))?;

    let mut count = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| TriageError::Archive(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| TriageError::Archive(e.to_string()))?
            .into_owned();
        let relative = contained_path(&path)
            .ok_or_else(|| TriageError::UnsafeArchivePath(path.display().to_string()))?;

        let kind = entry.header().entry_type();
        if matches!(kind, EntryType::Symlink | EntryType::Link) {
            let target = entry
                .link_name()
                .map_err(|e| TriageError::Archive(e.to_string()))?
                .map(|name| name.into_owned())
                .unwrap_or_default();
            let base = if kind == EntryType::Symlink {
                relative.parent().map(Path::to_path_buf).unwrap_or_default()
            } else {
                PathBuf::new()
            };
            if target.is_absolute() || contained_path(&base.join(&target)).is_none() {
                return Err(TriageError::UnsafeArchivePath(format!(
                    "{} -> {}",
                    path.display(),
                    target.display()
                )));
            }
        }

        if relative.as_os_str().is_empty() {
            continue;
        }
        // Archived directory modes are not applied: a read-only directory
        // would block its own children and the workspace cleanup.
        if kind == EntryType::Directory {
            std::fs::create_dir_all(dest.join(&relative))
                .map_err(|e| TriageError::Archive(format!("{}: {e}", path.display())))?;
            count += 1;
            continue;
        }
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| TriageError::Archive(format!("{}: {e}", path.display())))?;
        if !unpacked {
            return Err(TriageError::UnsafeArchivePath(path.display().to_string()));
        }
        count += 1;
    }
    Ok(count)
}

/// Lexically resolves `path` and returns it when it stays inside its root.
fn contained_path(path: &Path) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

fn host_directory(workspace: &Path) -> Result<PathBuf, TriageError> {
    let mut dirs = std::fs::read_dir(workspace)
        .map_err(|e| TriageError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    dirs.sort();
    dirs.into_iter()
        .next()
        .ok_or_else(|| TriageError::EmptyBundle("no extracted directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::{contained_path, extract_bundle, unpack_checked};
    use crate::errors::TriageError;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::path::{Path, PathBuf};

    fn append_file(builder: &mut tar::Builder<GzEncoder<std::fs::File>>, name: &str, body: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, body.as_bytes())
            .expect("append");
    }

    fn raw_name_entry(name: &str, body: &[u8]) -> Vec<u8> {
        let mut header = tar::Header::new_old();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut out);
            builder.append(&header, body).expect("append raw");
            builder.finish().expect("finish");
        }
        out
    }

    #[test]
    fn contained_path_rejects_escapes() {
        assert_eq!(
            contained_path(Path::new("web01/logs/./error.txt")),
            Some(PathBuf::from("web01/logs/error.txt"))
        );
        assert_eq!(
            contained_path(Path::new("web01/../web02/a.txt")),
            Some(PathBuf::from("web02/a.txt"))
        );
        assert_eq!(contained_path(Path::new("../evil.txt")), None);
        assert_eq!(contained_path(Path::new("web01/../../evil.txt")), None);
        assert_eq!(contained_path(Path::new("/etc/passwd")), None);
    }

    #[test]
    fn extracts_host_directory_and_cleans_up_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("bundle.tar.gz");
        let file = std::fs::File::create(&bundle).expect("create");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        append_file(&mut builder, "web01/nginx/error.txt", "line one\n");
        append_file(&mut builder, "web01/system.txt", "line two\n");
        builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip");

        let extracted = extract_bundle(&bundle).expect("extract");
        assert_eq!(extracted.hostdir, "web01");
        assert_eq!(extracted.entry_count, 2);
        assert!(extracted.root.join("nginx/error.txt").is_file());

        let root = extracted.root.clone();
        drop(extracted);
        assert!(!root.exists());
    }

    #[test]
    fn read_only_directories_do_not_block_their_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("bundle.tar.gz");
        let file = std::fs::File::create(&bundle).expect("create");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for name in ["web01/", "web01/nginx/"] {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o555);
            header.set_cksum();
            builder
                .append_data(&mut header, name, std::io::empty())
                .expect("append dir");
        }
        append_file(&mut builder, "web01/a.txt", "line one\n");
        append_file(&mut builder, "web01/nginx/error.txt", "line two\n");
        builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip");

        let extracted = extract_bundle(&bundle).expect("extract");
        assert_eq!(extracted.hostdir, "web01");
        assert_eq!(extracted.entry_count, 4);
        assert_eq!(
            std::fs::read_to_string(extracted.root.join("a.txt")).expect("read"),
            "line one\n"
        );
        assert!(extracted.root.join("nginx/error.txt").is_file());
        let perms = std::fs::metadata(&extracted.root)
            .expect("metadata")
            .permissions();
        assert!(!perms.readonly());

        let root = extracted.root.clone();
        drop(extracted);
        assert!(!root.exists());
    }

    #[test]
    fn parent_dir_entries_fail_closed() {
        let dest = tempfile::tempdir().expect("tempdir");
        let raw = raw_name_entry("../evil.txt", b"owned");
        let err = unpack_checked(raw.as_slice(), dest.path()).expect_err("unsafe");
        assert!(matches!(err, TriageError::UnsafeArchivePath(_)));
        assert!(!dest.path().join("../evil.txt").exists());
    }

    #[test]
    fn escaping_symlinks_fail_closed() {
        let dest = tempfile::tempdir().expect("tempdir");
        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut out);
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, "web01/escape", "../../etc")
                .expect("link");
            builder.finish().expect("finish");
        }
        let err = unpack_checked(out.as_slice(), dest.path()).expect_err("unsafe link");
        assert!(matches!(err, TriageError::UnsafeArchivePath(_)));
    }

    #[test]
    fn bundle_without_directory_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("flat.tar.gz");
        let file = std::fs::File::create(&bundle).expect("create");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        append_file(&mut builder, "loose.txt", "no host dir\n");
        builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip");

        let err = extract_bundle(&bundle).expect_err("empty");
        assert!(matches!(err, TriageError::EmptyBundle(_)));
    }

    #[test]
    fn missing_bundle_is_reported_as_missing_input() {
        let err = extract_bundle(Path::new("/definitely/not/here.tar.gz")).expect_err("missing");
        assert!(matches!(err, TriageError::MissingInput(_)));
    }
}
