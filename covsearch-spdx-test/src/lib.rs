// SPDX-License-Identifier: Apache-2.0

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Which files must carry `SPDX-License-Identifier: <license>` on their
/// first line (second line after a shebang).
#[derive(Debug, Deserialize)]
pub struct SpdxPolicy {
    pub license: String,
    /// Extensions whose comments start with `#`; everything else uses `//`.
    pub hash_comment_extensions: Vec<String>,
    /// Only files with these extensions are checked.
    pub checked_extensions: Vec<String>,
    pub exclude_dir_names: Vec<String>,
    pub exclude_exact_filenames: Vec<String>,
}

impl SpdxPolicy {
    fn extension_of(path: &Path) -> &str {
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    }

    fn expected_header(&self, path: &Path) -> String {
        let ext = Self::extension_of(path);
        let prefix = if self.hash_comment_extensions.iter().any(|e| e == ext) {
            "#"
        } else {
            "//"
        };
        format!("{} SPDX-License-Identifier: {}", prefix, self.license)
    }

    fn is_checked(&self, path: &Path) -> bool {
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if self.exclude_exact_filenames.iter().any(|n| n == filename) {
            return false;
        }
        let ext = Self::extension_of(path);
        self.checked_extensions.iter().any(|e| e == ext)
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dir_names.iter().any(|d| d == name)
    }

    pub fn has_header(&self, path: &Path) -> bool {
        let expected = self.expected_header(path);
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        let mut lines = io::BufReader::new(file).lines();
        match lines.next() {
            Some(Ok(first)) if first.starts_with("#!") => {
                matches!(lines.next(), Some(Ok(second)) if second.starts_with(&expected))
            }
            Some(Ok(first)) => first.starts_with(&expected),
            _ => false,
        }
    }

    /// Walks `root` and returns every checked file lacking the header.
    pub fn find_missing(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        let mut worklist: Vec<PathBuf> = vec![root.to_path_buf()];
        while let Some(dir) = worklist.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    let name = entry.file_name();
                    if !self.is_excluded_dir(&name.to_string_lossy()) {
                        worklist.push(path);
                    }
                    continue;
                }
                if self.is_checked(&path) && !self.has_header(&path) {
                    missing.push(path);
                }
            }
        }
        missing.sort();
        Ok(missing)
    }
}

pub fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .unwrap_or(manifest_dir)
        .to_path_buf()
}

pub fn load_workspace_policy() -> SpdxPolicy {
    let path = workspace_root().join("spdx_test.toml");
    let raw = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    toml::from_str(&raw).unwrap_or_else(|e| panic!("bad {}: {}", path.display(), e))
}

pub fn assert_workspace_spdx_clean() {
    let policy = load_workspace_policy();
    let missing = policy
        .find_missing(&workspace_root())
        .expect("walk workspace");
    for path in missing.iter() {
        eprintln!("  missing SPDX header: {}", path.display());
    }
    assert!(
        missing.is_empty(),
        "{} file(s) are missing SPDX identifiers",
        missing.len()
    );
}
