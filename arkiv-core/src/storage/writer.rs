//! Durable writes under the storage root.
//!
//! Every write validates root confinement and rejects symlinked path
//! components first (a TOCTOU window remains, as with any check-then-write
//! scheme on POSIX). Files are created with mode 0o640, fsynced, and the
//! parent directory is fsynced after renames.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::ArchiveError;
use crate::path_policy::{PathPolicyError, ensure_within_root};

const FILE_MODE: u32 = 0o640;

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Directory fsync after a rename. Some filesystems reject fsync on
/// directories; those failures are ignored.
fn fsync_dir_best_effort(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(unix)]
fn set_mode(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(FILE_MODE))
}

#[cfg(not(unix))]
fn set_mode(_file: &File) -> io::Result<()> {
    Ok(())
}

/// Reject `target_dir` if any component under the root is a symlink.
fn reject_symlinks_under_root(root: &Path, target_dir: &Path) -> Result<(), ArchiveError> {
    ensure_within_root(root, target_dir)?;

    let relative = match target_dir.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        // target_dir may be pre-resolved; retry against the resolved root.
        Err(_) => {
            let root_resolved = root
                .canonicalize()
                .map_err(|_| PathPolicyError::UnreadableComponent)?;
            target_dir
                .strip_prefix(&root_resolved)
                .map_err(|_| PathPolicyError::EscapesRoot)?
                .to_path_buf()
        }
    };

    let mut current = root.to_path_buf();
    for part in relative.components() {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(PathPolicyError::SymlinkUnderRoot.into());
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => break,
            Err(_) => return Err(PathPolicyError::UnreadableComponent.into()),
        }
    }
    Ok(())
}

fn precheck(target: &Path, storage_root: &Path) -> Result<PathBuf, ArchiveError> {
    let parent = target
        .parent()
        .ok_or(PathPolicyError::EscapesRoot)?
        .to_path_buf();
    ensure_within_root(storage_root, target)?;
    reject_symlinks_under_root(storage_root, &parent)?;
    ensure_dir(&parent)?;
    Ok(parent)
}

/// Direct (non-atomic) write: create/truncate, write, set mode, fsync file
/// and parent. The final component must not be a symlink.
pub fn write_bytes(
    target: &Path,
    data: &[u8],
    storage_root: &Path,
    fsync: bool,
) -> Result<(), ArchiveError> {
    let parent = precheck(target, storage_root)?;

    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(PathPolicyError::SymlinkUnderRoot.into());
        }
        _ => {}
    }

    let mut file = open_for_write(target)?;
    file.write_all(data)?;
    set_mode(&file)?;
    if fsync {
        file.sync_all()?;
    }
    drop(file);

    if fsync {
        fsync_dir_best_effort(&parent);
    }
    Ok(())
}

#[cfg(unix)]
fn open_for_write(target: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(target)
}

#[cfg(not(unix))]
fn open_for_write(target: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(target)
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 4] = rng.random();
    hex::encode(bytes)
}

/// Atomic write: temp file in the target's directory, write + fsync + mode
/// on the descriptor, rename over the target, fsync the directory. The temp
/// file is removed on every failure path.
pub fn write_atomic_bytes(
    target: &Path,
    data: &[u8],
    storage_root: &Path,
    fsync: bool,
) -> Result<(), ArchiveError> {
    let parent = precheck(target, storage_root)?;
    let tmp_path = parent.join(format!(".tmp-{}", random_suffix()));

    let result = (|| -> Result<(), ArchiveError> {
        let mut file = open_for_write(&tmp_path)?;
        file.write_all(data)?;
        set_mode(&file)?;
        if fsync {
            file.sync_all()?;
        }
        drop(file);
        fs::rename(&tmp_path, target)?;
        if fsync {
            fsync_dir_best_effort(&parent);
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Rename within the root after validating both endpoints.
pub fn move_file_within_root(
    src: &Path,
    dst: &Path,
    storage_root: &Path,
    fsync: bool,
) -> Result<(), ArchiveError> {
    ensure_within_root(storage_root, src)?;
    let parent = precheck(dst, storage_root)?;

    fs::rename(src, dst)?;
    if fsync {
        fsync_dir_best_effort(&parent);
    }
    Ok(())
}

/// One attachment destined for the archive's `attachments/` directory.
#[derive(Debug, Clone)]
pub struct AttachmentFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Group commit: write everything into a transient sibling staging
/// directory, then move files to their final locations in a fixed order
/// (attachments, PDF, sidecar last) so observing the sidecar implies a
/// complete archive. Staging is removed on all exit paths.
pub fn commit_archive(
    storage_root: &Path,
    target_path: &Path,
    sidecar_path: &Path,
    attachments_dir: &Path,
    ticket_id: u64,
    pdf_bytes: &[u8],
    sidecar_bytes: &[u8],
    attachments: &[AttachmentFile],
    fsync: bool,
) -> Result<(), ArchiveError> {
    let parent = target_path
        .parent()
        .ok_or(PathPolicyError::EscapesRoot)?
        .to_path_buf();
    ensure_within_root(storage_root, target_path)?;
    reject_symlinks_under_root(storage_root, &parent)?;
    ensure_dir(&parent)?;

    let staging = parent.join(format!(".tmp-archiving-{ticket_id}-{}", random_suffix()));
    let result = commit_into_staging(
        storage_root,
        &staging,
        target_path,
        sidecar_path,
        attachments_dir,
        pdf_bytes,
        sidecar_bytes,
        attachments,
        fsync,
    );
    if staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn commit_into_staging(
    storage_root: &Path,
    staging: &Path,
    target_path: &Path,
    sidecar_path: &Path,
    attachments_dir: &Path,
    pdf_bytes: &[u8],
    sidecar_bytes: &[u8],
    attachments: &[AttachmentFile],
    fsync: bool,
) -> Result<(), ArchiveError> {
    ensure_dir(staging)?;

    let filename = target_path
        .file_name()
        .ok_or(PathPolicyError::EmptyFilename)?;
    let sidecar_name = sidecar_path
        .file_name()
        .ok_or(PathPolicyError::EmptyFilename)?;

    let staged_pdf = staging.join(filename);
    let staged_sidecar = staging.join(sidecar_name);
    let staged_attachments = staging.join("attachments");

    if !attachments.is_empty() {
        ensure_dir(&staged_attachments)?;
        for attachment in attachments {
            write_bytes(
                &staged_attachments.join(&attachment.filename),
                &attachment.content,
                storage_root,
                fsync,
            )?;
        }
    }

    write_bytes(&staged_pdf, pdf_bytes, storage_root, fsync)?;
    write_bytes(&staged_sidecar, sidecar_bytes, storage_root, fsync)?;

    if !attachments.is_empty() {
        ensure_dir(attachments_dir)?;
        for attachment in attachments {
            move_file_within_root(
                &staged_attachments.join(&attachment.filename),
                &attachments_dir.join(&attachment.filename),
                storage_root,
                fsync,
            )?;
        }
    }

    move_file_within_root(&staged_pdf, target_path, storage_root, fsync)?;
    // Sidecar last: its presence signals a complete archive.
    move_file_within_root(&staged_sidecar, sidecar_path, storage_root, fsync)?;

    Ok(())
}
