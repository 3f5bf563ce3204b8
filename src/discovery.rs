use ignore::WalkBuilder;
use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};

/// How deep to look for test files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Every subdirectory of the root
    Recursive,
    /// Only the root directory itself
    Flat,
}

/// Find files whose name ends in `.<extension>` under `root`
///
/// Ignore files and hidden-file rules are not applied: every file counts.
/// Results are sorted so repeated runs see the same order.
pub fn discover_tests(root: &Path, extension: &str, mode: DiscoveryMode) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("test directory not found: {}", root.display()),
        ));
    }

    let suffix = format!(".{}", extension.trim_start_matches('.'));

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false) // os.walk と同じく全ファイルを対象にする
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b));
    if mode == DiscoveryMode::Flat {
        builder.max_depth(Some(1));
    }

    let mut tests = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        // シンボリックリンク先のファイルもテストとして扱う
        let is_file = entry.path().is_file();
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| name.ends_with(&suffix))
            .unwrap_or(false);

        if is_file && matches {
            tests.push(entry.into_path());
        }
    }

    tests.sort();
    debug!("Discovered {} test file(s) under {}", tests.len(), root.display());
    Ok(tests)
}
