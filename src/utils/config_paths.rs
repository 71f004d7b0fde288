//! Config path management
//!
//! Persistent configuration lives in `~/.procshield/`.

use anyhow::Result;
use std::path::PathBuf;

pub const CONFIG_DIR_NAME: &str = ".procshield";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub struct ConfigPaths {
    /// Persistent config directory (~/.procshield/)
    pub config_dir: PathBuf,
    /// Main configuration file
    pub config_file: PathBuf,
}

impl ConfigPaths {
    pub fn new() -> Result<Self> {
        let home_dir =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
        Ok(Self::with_home(home_dir))
    }

    /// Build the path set rooted at an explicit home directory.
    pub fn with_home(home_dir: PathBuf) -> Self {
        let config_dir = home_dir.join(CONFIG_DIR_NAME);
        Self {
            config_file: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_rooted_at_home() {
        let home = PathBuf::from("/home/tester");
        let paths = ConfigPaths::with_home(home.clone());
        assert_eq!(paths.config_dir, home.join(".procshield"));
        assert_eq!(paths.config_file, home.join(".procshield").join("config.toml"));
    }

    #[test]
    fn test_ensure_dirs_creates_config_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = ConfigPaths::with_home(tmp.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        assert!(paths.config_dir.is_dir());
    }
}
