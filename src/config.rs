use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scenario::TestScenario;

/// Harness configuration with the defaults the CLI falls back to
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Bound on every read from (and write to) a language server
    pub read_timeout: Duration,
    /// Bound on one compiler test, subject and verifier each
    pub test_timeout: Duration,
    /// Directory searched for test files
    pub test_dir: PathBuf,
    /// Test file extension, without the dot
    pub extension: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(5000),
            test_timeout: Duration::from_millis(30000),
            test_dir: PathBuf::from("tests"),
            extension: "allium".to_string(),
        }
    }
}

/// Resolve an executable name against `PATH`
///
/// 見つからない場合はそのまま返す。起動失敗はテストごとの失敗として記録される。
pub fn resolve_executable(name: &Path) -> PathBuf {
    match which::which(name) {
        Ok(path) => {
            debug!("Resolved {} to {}", name.display(), path.display());
            path
        }
        Err(e) => {
            warn!("Could not resolve executable {}: {}", name.display(), e);
            name.to_path_buf()
        }
    }
}

/// Load scenarios from a JSON array of `{name, method, params, expected}`
pub fn load_scenarios(path: &Path) -> Result<Vec<TestScenario>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    let scenarios: Vec<TestScenario> = serde_json::from_str(&content)
        .with_context(|| format!("invalid scenario file {}", path.display()))?;
    Ok(scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.extension, "allium");
        assert_eq!(config.test_dir, PathBuf::from("tests"));
    }

    #[test]
    fn test_load_scenarios() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("scenarios.json");
        std::fs::write(
            &path,
            json!([
                {"name": "init", "method": "initialize", "params": {"processId": 1}, "expected": {"ok": true}},
                {"name": "shutdown", "method": "shutdown", "expectedResult": null}
            ])
            .to_string(),
        )?;

        let scenarios = load_scenarios(&path)?;
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0].params, json!({"processId": 1}));
        assert_eq!(scenarios[1].method, "shutdown");
        Ok(())
    }

    #[test]
    fn test_load_scenarios_rejects_unknown_fields() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("scenarios.json");
        std::fs::write(&path, r#"[{"name": "x", "method": "m", "expected": 1, "extra": 2}]"#)?;

        assert!(load_scenarios(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_unresolvable_executable_is_kept() {
        let name = Path::new("definitely-not-an-allium-binary");
        assert_eq!(resolve_executable(name), PathBuf::from(name));
    }
}
