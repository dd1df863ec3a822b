// File: ./src/context.rs
/*! Application context abstraction for filesystem paths.

The `AppContext` trait decides where data and config live. Two
implementations:

- `StandardContext`: `directories::ProjectDirs`, or an override root
  (`--root` on the command line).
- `TestContext`: a unique temporary directory, removed on drop.

Every function doing filesystem IO takes a `&dyn AppContext`; there is no
global path state.
*/

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

/// Keeps only characters that are safe in a file name.
pub fn safe_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub trait AppContext: Send + Sync + std::fmt::Debug {
    fn get_data_dir(&self) -> Result<PathBuf>;
    fn get_config_dir(&self) -> Result<PathBuf>;

    fn get_config_file_path(&self) -> Result<PathBuf> {
        Ok(self.get_config_dir()?.join("config.toml"))
    }

    fn get_branch_path(&self, branch: &str) -> Result<PathBuf> {
        Ok(self
            .get_data_dir()?
            .join(format!("branch_{}.json", safe_file_stem(branch))))
    }

    fn get_history_path(&self, branch: &str) -> Result<PathBuf> {
        Ok(self
            .get_data_dir()?
            .join(format!("history_{}.json", safe_file_stem(branch))))
    }

    fn get_registry_path(&self) -> Result<PathBuf> {
        Ok(self.get_data_dir()?.join("branches.json"))
    }

    fn get_log_path(&self) -> Option<PathBuf> {
        self.get_data_dir().ok().map(|p| p.join("branchline.log"))
    }
}

// --- Production Implementation ---

#[derive(Clone, Debug)]
pub struct StandardContext {
    override_root: Option<PathBuf>,
}

impl StandardContext {
    /// When `override_root` is `Some(path)`, data and config go to `data`
    /// and `config` under that root.
    pub fn new(override_root: Option<PathBuf>) -> Self {
        Self { override_root }
    }

    fn ensure_exists(path: PathBuf) -> Result<PathBuf> {
        if !path.exists() {
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(path)
    }

    fn get_proj_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("com", "branchline", "branchline")
    }
}

impl AppContext for StandardContext {
    fn get_data_dir(&self) -> Result<PathBuf> {
        if let Some(root) = &self.override_root {
            return Self::ensure_exists(root.join("data"));
        }
        let proj = Self::get_proj_dirs().ok_or_else(|| anyhow::anyhow!("No home directory"))?;
        Self::ensure_exists(proj.data_dir().to_path_buf())
    }

    fn get_config_dir(&self) -> Result<PathBuf> {
        if let Some(root) = &self.override_root {
            return Self::ensure_exists(root.join("config"));
        }
        let proj = Self::get_proj_dirs().ok_or_else(|| anyhow::anyhow!("No home directory"))?;
        Self::ensure_exists(proj.config_dir().to_path_buf())
    }
}

// --- Test Implementation ---

#[derive(Clone, Debug)]
pub struct TestContext {
    pub root: PathBuf,
}

impl TestContext {
    /// Creates a new TestContext backed by a unique temporary directory.
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let root = std::env::temp_dir().join(format!("branchline_test_{}", uuid));
        std::fs::create_dir_all(&root).expect("failed to create TestContext temp dir");
        Self { root }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AppContext for TestContext {
    fn get_data_dir(&self) -> Result<PathBuf> {
        let p = self.root.join("data");
        std::fs::create_dir_all(&p)?;
        Ok(p)
    }

    fn get_config_dir(&self) -> Result<PathBuf> {
        let p = self.root.join("config");
        std::fs::create_dir_all(&p)?;
        Ok(p)
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        // Best-effort cleanup; ignore errors.
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_paths_are_sanitized() {
        let ctx = TestContext::new();
        let path = ctx.get_branch_path("../release/2.0").unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "branch_.._release_2.0.json"
        );
        assert!(path.starts_with(&ctx.root));
    }

    #[test]
    fn test_override_root() {
        let ctx = TestContext::new();
        let std_ctx = StandardContext::new(Some(ctx.root.clone()));
        assert_eq!(
            std_ctx.get_config_file_path().unwrap(),
            ctx.root.join("config").join("config.toml")
        );
    }
}
