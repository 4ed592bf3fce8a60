//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Validating a root before a job is created
//! - Enumerating a source tree into a work list
//! - Transferring one work item (directory creation or file copy)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::debug;

use crate::error::{EngineError, ItemError};
use crate::model::WorkItem;

/// Check that `path` exists, is a directory, and can be listed.
///
/// # Errors
/// - `SourceNotFound` if the path does not exist
/// - `SourceAccessDenied` if it cannot be inspected or read
/// - `InvalidPath` if it is not a directory
pub fn validate_root(path: &Path) -> Result<(), EngineError> {
    match fs::metadata(path) {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(EngineError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "Source must be a directory".to_string(),
                });
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(EngineError::SourceAccessDenied {
                path: path.to_path_buf(),
                source: e,
            });
        }
    }

    fs::read_dir(path)
        .map(|_| ())
        .map_err(|e| EngineError::SourceAccessDenied {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Enumerate every file and directory strictly under `source`.
///
/// The result is in pre-order: a directory is listed before anything inside
/// it, so creating items in list order is always valid. Siblings are visited
/// in file-name order, which makes the listing deterministic. Empty
/// directories are listed like any other directory. Symlinks are not
/// followed; they are listed as files.
///
/// # Errors
/// Returns `SourceNotFound` / `SourceAccessDenied` / `InvalidPath` for an
/// unusable root, and `EnumerationFailed` if any directory below it cannot be
/// listed.
pub fn enumerate(source: &Path) -> Result<Vec<WorkItem>, EngineError> {
    validate_root(source)?;

    fn recurse(path: &Path, rel_path: &Path, items: &mut Vec<WorkItem>) -> Result<(), EngineError> {
        let enum_err = |e: io::Error| EngineError::EnumerationFailed {
            path: path.to_path_buf(),
            source: e,
        };

        let mut entries = fs::read_dir(path)
            .map_err(enum_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(enum_err)?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let file_type = entry.file_type().map_err(enum_err)?;
            let rel_full_path = rel_path.join(entry.file_name());

            if file_type.is_dir() {
                items.push(WorkItem::dir(rel_full_path.clone()));
                recurse(&entry.path(), &rel_full_path, items)?;
            } else {
                items.push(WorkItem::file(rel_full_path));
            }
        }
        Ok(())
    }

    let mut items = Vec::new();
    recurse(source, Path::new(""), &mut items)?;
    debug!(source = %source.display(), items = items.len(), "enumerated source tree");
    Ok(items)
}

/// Transfer one work item from `source_root` to `destination_root`.
///
/// Directories are created recursively and an existing directory is not an
/// error, so re-running the same item is harmless. Files get their parent
/// created first and overwrite whatever is at the destination.
///
/// # Returns
/// Number of bytes copied (0 for directories)
pub fn transfer_item(
    item: &WorkItem,
    source_root: &Path,
    destination_root: &Path,
) -> Result<u64, ItemError> {
    let src = item.source_path(source_root);
    let dst = item.destination_path(destination_root);

    if item.is_dir {
        if let Err(e) = fs::symlink_metadata(&src) {
            return Err(source_error(&src, e));
        }
        create_dir(&dst)?;
        return Ok(0);
    }

    copy_file_with_metadata(&src, &dst)
}

/// Create a directory and any missing ancestors. Succeeds if it already exists.
pub fn create_dir(path: &Path) -> Result<(), ItemError> {
    fs::create_dir_all(path).map_err(|e| ItemError::DestinationWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Copy a file from source to destination with metadata preservation.
///
/// The modification time is always carried over; permission bits are copied
/// on a best-effort basis.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, ItemError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| source_error(src, e))?;
    let src_metadata = src_file.metadata().map_err(|e| ItemError::Io {
        path: src.to_path_buf(),
        source: e,
    })?;

    let mut dst_file = fs::File::create(dst).map_err(|e| ItemError::DestinationWrite {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if is_destination_error(&e) {
            ItemError::DestinationWrite {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            ItemError::Io {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    drop(dst_file);

    let mtime = FileTime::from_last_modification_time(&src_metadata);
    filetime::set_file_mtime(dst, mtime).map_err(|e| ItemError::Io {
        path: dst.to_path_buf(),
        source: e,
    })?;

    if let Err(e) = fs::set_permissions(dst, src_metadata.permissions()) {
        debug!(path = %dst.display(), error = %e, "could not copy permissions");
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), ItemError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(ItemError::DestinationWrite {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => create_dir(parent),
        Err(e) => Err(ItemError::DestinationWrite {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

fn source_error(path: &Path, e: io::Error) -> ItemError {
    let path: PathBuf = path.to_path_buf();
    if e.kind() == io::ErrorKind::NotFound {
        ItemError::SourceMissing { path }
    } else {
        ItemError::Io { path, source: e }
    }
}

/// Errors from a copy loop that point at the destination rather than the source.
fn is_destination_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    const DISK_FULL: &[i32] = &[28, 27]; // ENOSPC, EFBIG
    #[cfg(windows)]
    const DISK_FULL: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
    #[cfg(not(any(unix, windows)))]
    const DISK_FULL: &[i32] = &[];

    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WriteZero
    ) || e.raw_os_error().is_some_and(|code| DISK_FULL.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemErrorKind;
    use std::io::Write;

    #[test]
    fn test_enumerate_flat_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");

        let mut file1 = fs::File::create(src.join("file1.txt")).expect("Failed to create file1");
        file1.write_all(b"test data 1").expect("Failed to write file1");
        drop(file1);
        fs::write(src.join("file2.txt"), b"test data 2").expect("Failed to write file2");

        let items = enumerate(&src).expect("Failed to enumerate");

        assert_eq!(
            items,
            vec![WorkItem::file("file1.txt"), WorkItem::file("file2.txt")]
        );
    }

    #[test]
    fn test_enumerate_is_preorder_and_includes_empty_dirs() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path();

        fs::create_dir_all(src.join("sub").join("deeper")).expect("Failed to create dirs");
        fs::create_dir(src.join("empty")).expect("Failed to create empty dir");
        fs::write(src.join("a.txt"), b"a").expect("Failed to write a");
        fs::write(src.join("sub").join("b.txt"), b"b").expect("Failed to write b");
        fs::write(src.join("sub").join("deeper").join("c.txt"), b"c").expect("Failed to write c");

        let items = enumerate(src).expect("Failed to enumerate");

        assert_eq!(
            items,
            vec![
                WorkItem::file("a.txt"),
                WorkItem::dir("empty"),
                WorkItem::dir("sub"),
                WorkItem::file(Path::new("sub").join("b.txt")),
                WorkItem::dir(Path::new("sub").join("deeper")),
                WorkItem::file(Path::new("sub").join("deeper").join("c.txt")),
            ]
        );

        // No directory appears after one of its descendants
        for (i, item) in items.iter().enumerate() {
            for earlier in &items[..i] {
                assert!(
                    !earlier.relative_path.starts_with(&item.relative_path),
                    "{:?} listed before its ancestor {:?}",
                    earlier.relative_path,
                    item.relative_path
                );
            }
        }
    }

    #[test]
    fn test_enumerate_nonexistent_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("nonexistent");

        let result = enumerate(&src);
        assert!(matches!(result, Err(EngineError::SourceNotFound { .. })));
    }

    #[test]
    fn test_enumerate_rejects_file_root() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("file.txt");
        fs::write(&src, b"x").expect("Failed to write file");

        let result = enumerate(&src);
        assert!(matches!(result, Err(EngineError::InvalidPath { .. })));
    }

    #[test]
    fn test_copy_file_with_metadata() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("nested").join("dest.txt");

        fs::write(&src_file, b"test content").expect("Failed to write source");
        let old = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&src_file, old).expect("Failed to set mtime");

        let bytes = copy_file_with_metadata(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);

        let content = fs::read_to_string(&dst_file).expect("Failed to read dest");
        assert_eq!(content, "test content");

        let dst_meta = fs::metadata(&dst_file).expect("Failed to stat dest");
        assert_eq!(FileTime::from_last_modification_time(&dst_meta), old);
    }

    #[test]
    fn test_copy_overwrites_existing_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("dest.txt");

        fs::write(&src_file, b"new").expect("Failed to write source");
        fs::write(&dst_file, b"old and longer").expect("Failed to write dest");

        copy_file_with_metadata(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(fs::read(&dst_file).expect("Failed to read dest"), b"new");
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");

        assert!(temp_dir.path().join("subdir").is_dir());
    }

    #[test]
    fn test_ensure_parent_dir_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("blocker"), b"x").expect("Failed to write blocker");
        let path = temp_dir.path().join("blocker").join("file.txt");

        let err = ensure_parent_dir_exists(&path).expect_err("Parent is a file");
        assert_eq!(err.kind(), ItemErrorKind::DestinationWrite);
    }

    #[test]
    fn test_transfer_directory_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("sub")).expect("Failed to create src");

        let item = WorkItem::dir("sub");
        transfer_item(&item, &src, &dst).expect("First transfer failed");
        transfer_item(&item, &src, &dst).expect("Second transfer failed");

        assert!(dst.join("sub").is_dir());
        let entries = fs::read_dir(&dst).expect("Failed to list dst").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_transfer_reports_vanished_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src).expect("Failed to create src");

        let err = transfer_item(&WorkItem::file("gone.txt"), &src, &dst)
            .expect_err("Source does not exist");
        assert_eq!(err.kind(), ItemErrorKind::SourceMissing);

        let err = transfer_item(&WorkItem::dir("gone"), &src, &dst)
            .expect_err("Source does not exist");
        assert_eq!(err.kind(), ItemErrorKind::SourceMissing);
        assert!(!dst.join("gone").exists());
    }

    #[test]
    fn test_transfer_file_creates_missing_parents() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("a").join("b")).expect("Failed to create src");
        fs::write(src.join("a").join("b").join("c.txt"), b"data").expect("Failed to write");

        let item = WorkItem::file(Path::new("a").join("b").join("c.txt"));
        let bytes = transfer_item(&item, &src, &dst).expect("Transfer failed");

        assert_eq!(bytes, 4);
        assert_eq!(
            fs::read(dst.join("a").join("b").join("c.txt")).expect("Failed to read"),
            b"data"
        );
    }
}
