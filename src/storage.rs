use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolves a decoded URL path under the root and rejects symlinked components.
    pub async fn resolve_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    /// Lexically joins `relative` onto the root. `..` may only pop segments
    /// pushed by the same path, so the result never leaves the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(StorageError::OutsideRoot);
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::OutsideRoot);
                }
            }
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::OutsideRoot)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::OutsideRoot);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
                    }
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum StorageError {
    OutsideRoot,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{Storage, StorageError};
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn resolve_normalizes_parent_segments_inside_root() {
        let storage = Storage::new(PathBuf::from("/srv/share"));
        let resolved = storage.resolve("/docs/./old/../new").expect("resolve");
        assert_eq!(resolved, PathBuf::from("/srv/share/docs/new"));
    }

    #[test]
    fn resolve_rejects_escape_from_root() {
        let storage = Storage::new(PathBuf::from("/srv/share"));
        assert!(matches!(
            storage.resolve("/../../etc/passwd"),
            Err(StorageError::OutsideRoot)
        ));
        assert!(matches!(
            storage.resolve("/docs/../../etc/passwd"),
            Err(StorageError::OutsideRoot)
        ));
    }

    #[test]
    fn resolve_empty_path_is_root() {
        let storage = Storage::new(PathBuf::from("/srv/share"));
        assert_eq!(storage.resolve("/").expect("resolve"), PathBuf::from("/srv/share"));
        assert_eq!(storage.resolve("").expect("resolve"), PathBuf::from("/srv/share"));
    }

    #[tokio::test]
    async fn resolve_checked_reports_missing_path() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        let result = storage.resolve_checked("missing.txt").await;
        assert!(matches!(
            result,
            Err(StorageError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_checked_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");

        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, root.join("link")).expect("symlink");

        let storage = Storage::new(root);
        let result = storage.resolve_checked("link").await;
        assert!(matches!(result, Err(StorageError::OutsideRoot)));
    }
}
