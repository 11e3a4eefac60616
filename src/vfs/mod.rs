//! The virtual file system: maps virtual paths onto a chroot-style physical
//! root and renders directory listings.
//!
//! Mapping refuses to produce any physical path that is not a descendant of
//! the root, including escapes through symlinks: the deepest existing
//! ancestor of the candidate is canonicalized before the containment check.

pub mod path;

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Error type for virtual file system operations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The mapped path would land outside the chroot.
    #[error("Permission denied")]
    PermissionDenied,
    /// The target does not exist.
    #[error("File not found")]
    NotFound,
    /// Everything else the OS can throw at us.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    fn from_io(err: io::Error) -> VfsError {
        match err.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound,
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied,
            _ => VfsError::Io(err),
        }
    }
}

/// A single rendered directory entry, used by LIST/NLST/MLSD.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// File name without any directory part.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes; 0 is reported for directories.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

/// The chroot-rooted virtual file system.
#[derive(Debug, Clone)]
pub struct Vfs {
    root: PathBuf,
}

impl Vfs {
    /// Create a `Vfs` rooted at `root`. The directory is created if missing
    /// and fully resolved so later containment checks compare canonical
    /// paths.
    pub fn new<P: Into<PathBuf>>(root: P) -> io::Result<Vfs> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Vfs { root })
    }

    /// The canonical physical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a normalized virtual path onto a physical one.
    ///
    /// The target itself does not need to exist (uploads create it), but the
    /// deepest existing ancestor is resolved through symlinks and the result
    /// must stay inside the root.
    pub fn to_physical(&self, virt: &str) -> Result<PathBuf, VfsError> {
        let mut candidate = self.root.clone();
        for segment in virt.split('/').filter(|s| !s.is_empty()) {
            // A normalized path has no dot segments, but never trust input
            // that crosses the virtual/physical boundary.
            if matches!(Path::new(segment).components().next(), Some(Component::ParentDir | Component::RootDir)) {
                return Err(VfsError::PermissionDenied);
            }
            candidate.push(segment);
        }

        let resolved = self.resolve_existing_prefix(&candidate)?;
        if resolved == self.root || resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(VfsError::PermissionDenied)
        }
    }

    // Canonicalize the part of `candidate` that exists on disk and re-append
    // the not-yet-created remainder.
    fn resolve_existing_prefix(&self, candidate: &Path) -> Result<PathBuf, VfsError> {
        let mut existing = candidate.to_path_buf();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        loop {
            match existing.canonicalize() {
                Ok(resolved) => {
                    let mut out = resolved;
                    for part in tail.iter().rev() {
                        out.push(part);
                    }
                    return Ok(out);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    match (existing.file_name(), existing.parent()) {
                        (Some(name), Some(parent)) => {
                            tail.push(name.to_os_string());
                            existing = parent.to_path_buf();
                        }
                        _ => return Err(VfsError::PermissionDenied),
                    }
                }
                Err(err) => return Err(VfsError::from_io(err)),
            }
        }
    }

    /// Metadata of a mapped target.
    pub async fn metadata(&self, virt: &str) -> Result<Metadata, VfsError> {
        let phys = self.to_physical(virt)?;
        tokio::fs::metadata(phys).await.map_err(VfsError::from_io)
    }

    /// Size in bytes of a regular file.
    pub async fn size(&self, virt: &str) -> Result<u64, VfsError> {
        let md = self.metadata(virt).await?;
        if md.is_dir() {
            return Err(VfsError::NotFound);
        }
        Ok(md.len())
    }

    /// Last-modified time of a target.
    pub async fn modified(&self, virt: &str) -> Result<SystemTime, VfsError> {
        let md = self.metadata(virt).await?;
        md.modified().map_err(VfsError::from_io)
    }

    /// Create a directory and any missing ancestors.
    pub async fn make_dirs(&self, virt: &str) -> Result<PathBuf, VfsError> {
        let phys = self.to_physical(virt)?;
        tokio::fs::create_dir_all(&phys).await.map_err(VfsError::from_io)?;
        Ok(phys)
    }

    /// Remove a regular file.
    pub async fn remove_file(&self, virt: &str) -> Result<(), VfsError> {
        let phys = self.to_physical(virt)?;
        tokio::fs::remove_file(phys).await.map_err(VfsError::from_io)
    }

    /// Remove an empty directory.
    pub async fn remove_dir(&self, virt: &str) -> Result<(), VfsError> {
        let phys = self.to_physical(virt)?;
        tokio::fs::remove_dir(phys).await.map_err(VfsError::from_io)
    }

    /// Remove a directory tree.
    pub async fn remove_dir_all(&self, virt: &str) -> Result<(), VfsError> {
        let phys = self.to_physical(virt)?;
        tokio::fs::remove_dir_all(phys).await.map_err(VfsError::from_io)
    }

    /// Rename `from` to `to`; both are virtual paths.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        let from = self.to_physical(from)?;
        let to = self.to_physical(to)?;
        tokio::fs::rename(from, to).await.map_err(VfsError::from_io)
    }

    /// Whether a mapped target exists.
    pub async fn exists(&self, virt: &str) -> bool {
        match self.to_physical(virt) {
            Ok(phys) => tokio::fs::metadata(phys).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Read a directory and collect entries sorted by name.
    pub async fn list_dir(&self, virt: &str) -> Result<Vec<DirEntry>, VfsError> {
        let phys = self.to_physical(virt)?;
        let mut rd = tokio::fs::read_dir(phys).await.map_err(VfsError::from_io)?;
        let mut entries = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(VfsError::from_io)? {
            let md = match entry.metadata().await {
                Ok(md) => md,
                // Entries racing with deletion just drop out of the listing.
                Err(_) => continue,
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: md.is_dir(),
                size: if md.is_dir() { 0 } else { md.len() },
                modified: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Entry description for a single target, named by its virtual path.
    pub async fn stat_entry(&self, virt: &str) -> Result<DirEntry, VfsError> {
        let md = self.metadata(virt).await?;
        Ok(DirEntry {
            name: path::base_name(virt).to_string(),
            is_dir: md.is_dir(),
            size: if md.is_dir() { 0 } else { md.len() },
            modified: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }
}

// C-locale month abbreviations; the listing format must not follow the
// process locale.
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Render one entry as a classic UNIX `ls -l` line:
/// `drwxr-xr-x 1 owner group <size> <Mon> <dd> <HH:mm> <name>`.
pub fn unix_list_line(entry: &DirEntry) -> String {
    let local: DateTime<Local> = entry.modified.into();
    let month = MONTHS[local.month0() as usize];
    format!(
        "{}{} 1 owner group {:>12} {} {:02} {:02}:{:02} {}",
        if entry.is_dir { 'd' } else { '-' },
        if entry.is_dir { "rwxr-xr-x" } else { "rw-r--r--" },
        entry.size,
        month,
        local.day(),
        local.hour(),
        local.minute(),
        entry.name,
    )
}

/// Render one entry as an RFC 3659 MLSD fact line. Directories advertise
/// `perm=el`, files `perm=rl`; the modify fact is UTC.
pub fn mlsd_fact_line(entry: &DirEntry) -> String {
    let utc: DateTime<Utc> = entry.modified.into();
    let modify = utc.format("%Y%m%d%H%M%S");
    if entry.is_dir {
        format!("type=dir;modify={};perm=el; {}", modify, entry.name)
    } else {
        format!("type=file;modify={};size={};perm=rl; {}", modify, entry.size, entry.name)
    }
}

/// Hard-coded list line for entries injected by a virtual-file overlay.
pub fn synthetic_list_line(name: &str, is_dir: bool, size: u64) -> String {
    format!(
        "{}{} 1 owner group {:>12} Jan 01 00:00 {}",
        if is_dir { 'd' } else { '-' },
        if is_dir { "rwxr-xr-x" } else { "rw-r--r--" },
        size,
        name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn fixture() -> (tempfile::TempDir, Vfs) {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::new(dir.path()).unwrap();
        (dir, vfs)
    }

    #[test]
    fn maps_inside_root() {
        let (_dir, vfs) = fixture();
        let phys = vfs.to_physical("/sub/file.bin").unwrap();
        assert!(phys.starts_with(vfs.root()));
        assert!(phys.ends_with("sub/file.bin"));
    }

    #[test]
    fn root_maps_to_root() {
        let (_dir, vfs) = fixture();
        assert_eq!(vfs.to_physical("/").unwrap(), vfs.root());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_denied() {
        let (dir, vfs) = fixture();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("out")).unwrap();
        let err = vfs.to_physical("/out/secret").unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied));
    }

    #[tokio::test]
    async fn listing_renders_sizes_and_types() {
        let (_dir, vfs) = fixture();
        vfs.make_dirs("/sub").await.unwrap();
        tokio::fs::write(vfs.to_physical("/hello.txt").unwrap(), b"hi\n").await.unwrap();

        let entries = vfs.list_dir("/").await.unwrap();
        assert_eq!(entries.len(), 2);
        let file = entries.iter().find(|e| e.name == "hello.txt").unwrap();
        let sub = entries.iter().find(|e| e.name == "sub").unwrap();
        assert_eq!(file.size, 3);
        assert!(!file.is_dir);
        assert_eq!(sub.size, 0);
        assert!(sub.is_dir);

        let line = unix_list_line(file);
        assert!(line.starts_with("-rw-r--r-- 1 owner group"), "{line}");
        assert!(line.ends_with("hello.txt"), "{line}");
        let dline = unix_list_line(sub);
        assert!(dline.starts_with("drwxr-xr-x"), "{dline}");
    }

    #[test]
    fn mlsd_facts() {
        let entry = DirEntry {
            name: "x.rar".into(),
            is_dir: false,
            size: 42,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(86_400),
        };
        assert_eq!(mlsd_fact_line(&entry), "type=file;modify=19700102000000;size=42;perm=rl; x.rar");
        let dir = DirEntry { name: "d".into(), is_dir: true, size: 0, modified: SystemTime::UNIX_EPOCH };
        assert_eq!(mlsd_fact_line(&dir), "type=dir;modify=19700101000000;perm=el; d");
    }
}
