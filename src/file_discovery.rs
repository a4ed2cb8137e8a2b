use crate::error::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Finds the instance documents of a batch run
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include (e.g., ["xml", "cmdi"])
    extensions: Vec<String>,
    /// Maximum depth below the root directory (None = unlimited)
    max_depth: Option<usize>,
    /// Follow symbolic links
    follow_symlinks: bool,
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            max_depth: None,
            follow_symlinks: false,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Files directly inside the root are at depth 0
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Discover matching files under `path` (a file or a directory), sorted
    pub async fn discover_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_file() {
            return Ok(if self.should_process(path) {
                vec![path.to_path_buf()]
            } else {
                Vec::new()
            });
        }

        let discovery = self.clone();
        let root = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || discovery.walk(&root))
            .await
            .map_err(std::io::Error::other)?;
        Ok(files)
    }

    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .follow_links(self.follow_symlinks)
            .max_depth(self.max_depth.map(|depth| depth + 1))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    let is_file = entry.file_type().is_some_and(|t| t.is_file());
                    if is_file && self.should_process(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(err) => warn!(error = %err, "skipping unreadable entry"),
            }
        }
        files.sort();
        files
    }

    /// Whether a file has one of the configured extensions
    pub fn should_process(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::fs;

    async fn create_test_directory() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("subdir1")).await.unwrap();
        fs::create_dir_all(root.join("subdir2/nested"))
            .await
            .unwrap();

        fs::write(root.join("file1.xml"), "<a/>").await.unwrap();
        fs::write(root.join("file2.XML"), "<a/>").await.unwrap();
        fs::write(root.join("file3.txt"), "text file").await.unwrap();
        fs::write(root.join("subdir1/nested.xml"), "<a/>")
            .await
            .unwrap();
        fs::write(root.join("subdir2/nested/deep.xml"), "<a/>")
            .await
            .unwrap();
        fs::write(root.join("subdir2/nested/other.xsd"), "<xs:schema/>")
            .await
            .unwrap();

        temp_dir
    }

    fn names(files: &[PathBuf]) -> HashSet<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_discover_xml_files() {
        let temp_dir = create_test_directory().await;
        let files = FileDiscovery::new()
            .discover_files(temp_dir.path())
            .await
            .unwrap();

        let names = names(&files);
        assert_eq!(files.len(), 4);
        assert!(names.contains("file2.XML"));
        assert!(names.contains("deep.xml"));
        assert!(!names.contains("other.xsd"));
    }

    #[tokio::test]
    async fn test_discover_multiple_extensions() {
        let temp_dir = create_test_directory().await;
        let discovery =
            FileDiscovery::new().with_extensions(vec!["xml".to_string(), "xsd".to_string()]);

        let files = discovery.discover_files(temp_dir.path()).await.unwrap();
        assert_eq!(files.len(), 5);
    }

    #[tokio::test]
    async fn test_max_depth_limit() {
        let temp_dir = create_test_directory().await;
        let discovery = FileDiscovery::new().with_max_depth(Some(1));

        let files = discovery.discover_files(temp_dir.path()).await.unwrap();

        let names = names(&files);
        assert_eq!(files.len(), 3);
        assert!(names.contains("nested.xml"));
        assert!(!names.contains("deep.xml"));
    }

    #[tokio::test]
    async fn test_single_file_path() {
        let temp_dir = create_test_directory().await;
        let discovery = FileDiscovery::new();

        let files = discovery
            .discover_files(&temp_dir.path().join("file1.xml"))
            .await
            .unwrap();
        assert_eq!(files.len(), 1);

        let files = discovery
            .discover_files(&temp_dir.path().join("file3.txt"))
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_should_process() {
        let discovery = FileDiscovery::new();

        assert!(discovery.should_process(Path::new("test.xml")));
        assert!(!discovery.should_process(Path::new("test.txt")));
        assert!(!discovery.should_process(Path::new("test")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directories_are_opt_in() {
        let temp_dir = create_test_directory().await;
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("linked.xml"), "<a/>").await.unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        let files = FileDiscovery::new()
            .discover_files(temp_dir.path())
            .await
            .unwrap();
        assert!(!names(&files).contains("linked.xml"));

        let files = FileDiscovery::new()
            .with_follow_symlinks(true)
            .discover_files(temp_dir.path())
            .await
            .unwrap();
        assert!(names(&files).contains("linked.xml"));
    }

    #[tokio::test]
    async fn test_nonexistent_directory() {
        let result = FileDiscovery::new()
            .discover_files(Path::new("/nonexistent/path"))
            .await;

        assert!(matches!(result, Err(SchemaError::Io(_))));
    }
}
