//! Crash-safe replacement of files on disk.

use getrandom::fill;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A file that is only ever replaced atomically.
///
/// Used for both the encrypted file and the carrier image. New contents are
/// staged in a hidden sibling and renamed over the target, so after a crash
/// the target holds either its old or its new contents.
#[derive(Clone, Debug)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    /// Replaces the file with `data`.
    pub fn save(&self, data: &[u8]) -> io::Result<()> {
        self.save_with(|w| w.write_all(data))
    }

    /// Replaces the file with whatever `write` produces.
    ///
    /// A symlink is followed and its target replaced, and the replacement
    /// keeps the permissions of the file it replaces. The staged file is
    /// fsynced before the rename and the parent directory after it. If
    /// `write` fails the staged file is discarded and the target is not
    /// touched.
    pub fn save_with<E, F>(&self, write: F) -> Result<(), E>
    where
        E: From<io::Error>,
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
    {
        let target = resolve(&self.path)?;
        let permissions = match fs::metadata(&target) {
            Ok(meta) => Some(meta.permissions()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let staged = Staged::create(&target)?;

        let mut writer = BufWriter::new(staged.file()?);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if let Some(permissions) = permissions {
            file.set_permissions(permissions)?;
        }
        file.sync_all()?;
        drop(file);

        staged.commit(&target)?;
        sync_parent(&target)?;
        Ok(())
    }
}

/// Follows symlinks so the file they point at is replaced, not the link.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(_) => fs::canonicalize(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(e),
    }
}

/// A temporary sibling of the target. Removed on drop unless committed.
struct Staged {
    path: PathBuf,
    committed: bool,
}

impl Staged {
    fn create(target: &Path) -> io::Result<Self> {
        let name = target
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
            .to_string_lossy();

        let mut nonce = [0u8; 8];
        fill(&mut nonce).map_err(|_| io::Error::other("OS random generator unavailable"))?;
        let suffix: String = nonce.iter().map(|b| format!("{b:02x}")).collect();

        Ok(Self {
            path: target.with_file_name(format!(".{name}.{suffix}.partial")),
            committed: false,
        })
    }

    /// Opens the staged file, failing if the name is already taken.
    fn file(&self) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
    }

    fn commit(mut self, target: &Path) -> io::Result<()> {
        replace(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(unix)]
fn sync_parent(target: &Path) -> io::Result<()> {
    match target.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_: &Path) -> io::Result<()> {
    Ok(())
}

/// Renames `staged` over `target` in one step.
///
/// `ReplaceFileW` needs an existing target, so a first write falls back to a
/// plain rename.
#[cfg(windows)]
fn replace(staged: &Path, target: &Path) -> io::Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

    if !target.exists() {
        return fs::rename(staged, target);
    }

    let wide = |p: &Path| -> Vec<u16> { p.as_os_str().encode_wide().chain([0]).collect() };
    let target_w = wide(target);
    let staged_w = wide(staged);

    // SAFETY: both buffers are NUL-terminated UTF-16 and outlive the call;
    // the optional pointers are null.
    let ok = unsafe {
        ReplaceFileW(
            target_w.as_ptr(),
            staged_w.as_ptr(),
            std::ptr::null(),
            REPLACEFILE_WRITE_THROUGH,
            std::ptr::null(),
            std::ptr::null(),
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(windows))]
fn replace(staged: &Path, target: &Path) -> io::Result<()> {
    fs::rename(staged, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("cover.png"));
        assert!(!storage.exists());

        storage.save(b"pixels").unwrap();

        assert!(storage.exists());
        assert_eq!(storage.load().unwrap(), b"pixels");
        assert_eq!(names(dir.path()), ["cover.png"]);
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = Storage::new(dir.path().join("missing")).load().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn staged_names_are_hidden_unique_siblings() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("notes.txt");

        let a = Staged::create(&target).unwrap();
        let b = Staged::create(&target).unwrap();

        assert_ne!(a.path, b.path);
        assert_eq!(a.path.parent(), target.parent());
        let name = a.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".notes.txt."));
        assert!(name.ends_with(".partial"));
    }

    #[test]
    fn staged_file_is_removed_when_dropped() {
        let dir = tempdir().unwrap();
        let staged = Staged::create(&dir.path().join("notes.txt")).unwrap();
        staged.file().unwrap();
        assert_eq!(names(dir.path()).len(), 1);

        drop(staged);

        assert!(names(dir.path()).is_empty());
    }

    #[test]
    fn streamed_write_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"plaintext").unwrap();

        Storage::new(&path)
            .save_with(|w| {
                for chunk in [b"token-0", b"token-1", b"token-2"] {
                    w.write_all(chunk)?;
                }
                Ok::<(), io::Error>(())
            })
            .unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"token-0token-1token-2");
        assert_eq!(names(dir.path()), ["notes.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn replacement_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"secret").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        Storage::new(&path).save(b"ciphertext").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&path).unwrap(), b"ciphertext");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_followed_and_kept() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.txt");
        let link = dir.path().join("link.txt");
        fs::write(&real, b"top secret").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        Storage::new(&link).save(b"ciphertext").unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&real).unwrap(), b"ciphertext");
        assert_eq!(names(dir.path()), ["link.txt", "real.txt"]);
    }

    #[test]
    fn failed_write_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"ciphertext").unwrap();

        let result: io::Result<()> = Storage::new(&path).save_with(|w| {
            w.write_all(b"half a chunk")?;
            Err(io::Error::other("authentication failed"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"ciphertext");
        assert_eq!(names(dir.path()), ["notes.txt"]);
    }
}
