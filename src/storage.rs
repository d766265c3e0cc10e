use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

use crate::config::{OTHERS_FOLDER, UPLOAD_DIR_NAME};

/// Filesystem layout of the service: `<root>/upload/<folder>/<file>`.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    upload_dir: PathBuf,
}

/// Destination of an accepted upload.
#[derive(Clone, Debug)]
pub struct StoredFile {
    pub folder: String,
    pub file_name: String,
    pub path: PathBuf,
}

impl StoredFile {
    /// Path relative to the service root, always `/` separated.
    pub fn relative_path(&self) -> String {
        format!("{UPLOAD_DIR_NAME}/{}/{}", self.folder, self.file_name)
    }
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        let upload_dir = root.join(UPLOAD_DIR_NAME);
        Self { root, upload_dir }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.upload_dir).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Creates `upload/<folder>` for `original` and returns where it will be stored.
    pub async fn prepare_destination(
        &self,
        original: &str,
        now_ms: i64,
    ) -> Result<StoredFile, StorageError> {
        let folder = folder_for(original);
        let dir = self.upload_dir.join(&folder);
        fs::create_dir_all(&dir).await?;
        let file_name = stored_file_name(now_ms, original);
        let path = dir.join(&file_name);
        Ok(StoredFile {
            folder,
            file_name,
            path,
        })
    }

    /// Resolves a client supplied path against the service root. The result must stay
    /// inside the upload directory and must not pass through a symlink.
    pub async fn resolve_download(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve_lexical(relative)?;
        if is_hidden(&target, &self.upload_dir) {
            return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
        }
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    fn resolve_lexical(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut resolved = self.root.clone();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => continue,
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::Forbidden);
                }
            }
        }

        if !resolved.starts_with(&self.upload_dir) {
            return Err(StorageError::Forbidden);
        }
        Ok(resolved)
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.upload_dir)
            .map_err(|_| StorageError::Forbidden)?;
        let mut current = self.upload_dir.clone();
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            let metadata = fs::symlink_metadata(&current).await?;
            if metadata.file_type().is_symlink() {
                return Err(StorageError::Forbidden);
            }
            if components.peek().is_some() && !metadata.is_dir() {
                return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
            }
        }

        Ok(())
    }
}

/// Dotfiles under the upload directory, including in-flight upload temp files.
fn is_hidden(target: &Path, upload_dir: &Path) -> bool {
    target.strip_prefix(upload_dir).is_ok_and(|relative| {
        relative
            .components()
            .any(|component| component.as_os_str().to_string_lossy().starts_with('.'))
    })
}

/// Lower-cased extension of `name`, empty when it has none.
///
/// A leading dot does not start an extension (`.bashrc` has none) and a trailing dot
/// yields an empty one.
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(index) => name[index + 1..].to_lowercase(),
    }
}

/// Folder an upload is filed under.
pub fn folder_for(name: &str) -> String {
    let ext = extension_of(name);
    if ext.is_empty() {
        OTHERS_FOLDER.to_string()
    } else {
        ext
    }
}

pub fn stored_file_name(timestamp_ms: i64, original: &str) -> String {
    format!("{timestamp_ms}-{original}")
}

/// Keeps only the last path segment of a client file name.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    match name {
        "" | "." | ".." => None,
        _ => Some(name.to_string()),
    }
}

#[derive(Debug)]
pub enum StorageError {
    Forbidden,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        std::fs::create_dir_all(storage.upload_dir()).expect("create upload dir");
        (temp, storage)
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("Song.MP3"), "mp3");
        assert_eq!(extension_of("archive.tar.GZ"), "gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of(".bashrc"), "");
        assert_eq!(extension_of("trailing."), "");
    }

    #[test]
    fn names_without_extension_go_to_others() {
        assert_eq!(folder_for("README"), "others");
        assert_eq!(folder_for(".env"), "others");
        assert_eq!(folder_for("photo.JPG"), "jpg");
    }

    #[test]
    fn stored_name_prefixes_timestamp() {
        assert_eq!(
            stored_file_name(1_700_000_000_123, "song.mp3"),
            "1700000000123-song.mp3"
        );
    }

    #[test]
    fn sanitize_keeps_last_segment() {
        assert_eq!(sanitize_file_name("song.mp3").as_deref(), Some("song.mp3"));
        assert_eq!(
            sanitize_file_name("../../etc/cover.png").as_deref(),
            Some("cover.png")
        );
        assert_eq!(
            sanitize_file_name("C:\\Users\\me\\clip.mp4").as_deref(),
            Some("clip.mp4")
        );
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[tokio::test]
    async fn prepare_destination_creates_folder() {
        let (_temp, storage) = make_storage();
        let stored = storage
            .prepare_destination("Track.WAV", 42)
            .await
            .expect("prepare destination");
        assert_eq!(stored.folder, "wav");
        assert_eq!(stored.relative_path(), "upload/wav/42-Track.WAV");
        assert!(storage.upload_dir().join("wav").is_dir());
        assert_eq!(stored.path, storage.upload_dir().join("wav/42-Track.WAV"));
    }

    #[tokio::test]
    async fn resolve_download_rejects_traversal() {
        let (_temp, storage) = make_storage();
        for path in [
            "../../etc/passwd",
            "upload/../secret.txt",
            "upload2/file.jpg",
            "src/main.rs",
        ] {
            let result = storage.resolve_download(path).await;
            assert!(
                matches!(result, Err(StorageError::Forbidden)),
                "{path} should be forbidden"
            );
        }
    }

    #[tokio::test]
    async fn resolve_download_reports_missing_file() {
        let (_temp, storage) = make_storage();
        let result = storage.resolve_download("upload/jpg/missing.jpg").await;
        assert!(matches!(result, Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn resolve_download_accepts_stored_file() {
        let (_temp, storage) = make_storage();
        let dir = storage.upload_dir().join("png");
        std::fs::create_dir_all(&dir).expect("create folder");
        std::fs::write(dir.join("1-a.png"), b"png").expect("write file");

        let resolved = storage
            .resolve_download("/upload/./png/1-a.png")
            .await
            .expect("resolve");
        assert_eq!(resolved, dir.join("1-a.png"));
    }

    #[tokio::test]
    async fn resolve_download_hides_dotfiles() {
        let (_temp, storage) = make_storage();
        let dir = storage.upload_dir().join("mp3");
        std::fs::create_dir_all(&dir).expect("create folder");
        std::fs::write(dir.join(".1-song.mp3.tmp.abc"), b"partial").expect("write temp");

        let result = storage
            .resolve_download("upload/mp3/.1-song.mp3.tmp.abc")
            .await;
        assert!(matches!(result, Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_download_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage();
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        let dir = storage.upload_dir().join("jpg");
        std::fs::create_dir_all(&dir).expect("create folder");
        symlink(&outside, dir.join("link.jpg")).expect("symlink");

        let result = storage.resolve_download("upload/jpg/link.jpg").await;
        assert!(matches!(result, Err(StorageError::Forbidden)));
    }
}
