use codechat_chunker::Language;
use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};

/// Directories never indexed or watched, matched per path component
pub const IGNORED_SCOPES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".cache",
    "node_modules",
    ".next",
    "dist",
    "build",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".mypy_cache",
    ".pytest_cache",
];

pub const MAX_FILE_SIZE_BYTES: u64 = 1_048_576; // 1 MiB

/// Scanner for finding source files in a workspace
pub struct FileScanner {
    root: PathBuf,
    max_file_size: u64,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size: MAX_FILE_SIZE_BYTES,
        }
    }

    #[must_use]
    pub const fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Scan for source files (.gitignore aware), as sorted workspace-relative paths
    pub fn scan(&self) -> Vec<String> {
        let mut files = Vec::new();

        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false);
        builder.filter_entry(move |entry| {
            relative_path(&root, entry.path()).map_or(true, |rel| !is_ignored_scope(&rel))
        });

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    if let Ok(meta) = entry.metadata() {
                        if meta.len() > self.max_file_size {
                            log::debug!(
                                "Skipping large file {} ({} bytes > {})",
                                path.display(),
                                meta.len(),
                                self.max_file_size
                            );
                            continue;
                        }
                    }

                    if !is_source_file(path) {
                        continue;
                    }
                    if let Some(rel) = relative_path(&self.root, path) {
                        files.push(rel);
                    }
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort();
        log::info!("Found {} source files", files.len());
        files
    }
}

/// Workspace-relative path with `/` separators; `None` outside the root
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Files with a recognized source language
pub fn is_source_file(path: &Path) -> bool {
    Language::from_path(path) != Language::Unknown
}

pub fn is_ignored_scope(relative: &str) -> bool {
    relative.split('/').any(|component| {
        let lowered = component.to_lowercase();
        IGNORED_SCOPES.iter().any(|ignored| *ignored == lowered)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_sources_and_skips_ignored_scopes() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/net")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("target/debug")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/net/client.py"), "def f(): pass").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x()").unwrap();
        fs::write(root.join("target/debug/gen.rs"), "fn g() {}").unwrap();
        fs::write(root.join("README.bin"), [0u8, 1, 2]).unwrap();

        let files = FileScanner::new(root).scan();
        assert_eq!(files, vec!["src/main.rs".to_string(), "src/net/client.py".to_string()]);
    }

    #[test]
    fn respects_gitignore_and_size_cap() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join(".gitignore"), "/generated\n").unwrap();
        fs::write(root.join("generated/out.rs"), "fn x() {}").unwrap();
        fs::write(root.join("big.rs"), "a".repeat(64)).unwrap();
        fs::write(root.join("small.rs"), "fn s() {}").unwrap();

        let files = FileScanner::new(root).with_max_file_size(32).scan();
        assert_eq!(files, vec!["small.rs".to_string()]);
    }

    #[test]
    fn relative_paths_are_normalized() {
        let root = Path::new("/work/repo");
        assert_eq!(
            relative_path(root, Path::new("/work/repo/src/lib.rs")),
            Some("src/lib.rs".to_string())
        );
        assert_eq!(relative_path(root, Path::new("/elsewhere/lib.rs")), None);
        assert_eq!(relative_path(root, root), None);
    }

    #[test]
    fn ignored_scope_matches_any_component() {
        assert!(is_ignored_scope("a/node_modules/b.js"));
        assert!(is_ignored_scope(".git/HEAD"));
        assert!(!is_ignored_scope("src/targeting.rs"));
    }
}
