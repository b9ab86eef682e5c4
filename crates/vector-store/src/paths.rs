use codechat_chunker::sha256_hex;
use std::path::{Path, PathBuf};

pub const VECTORS_FILE: &str = "vectors.json";
pub const VECTORS_META_FILE: &str = "vectors.meta.json";
pub const RECORDS_FILE: &str = "records.json";
pub const GRAPH_FILE: &str = "graph.json";

/// Stable identity of a workspace root: 16 hex chars of its canonical path hash.
#[must_use]
pub fn workspace_id(root: &Path) -> String {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let mut id = sha256_hex(canonical.to_string_lossy().as_bytes());
    id.truncate(16);
    id
}

/// Workspace-keyed cache directory and the files inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    dir: PathBuf,
}

impl CachePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn for_workspace(cache_root: &Path, workspace_root: &Path) -> Self {
        Self::new(cache_root.join(workspace_id(workspace_root)))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn vectors(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    #[must_use]
    pub fn vectors_meta(&self) -> PathBuf {
        self.dir.join(VECTORS_META_FILE)
    }

    #[must_use]
    pub fn records(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    #[must_use]
    pub fn graph(&self) -> PathBuf {
        self.dir.join(GRAPH_FILE)
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
