//! Persistent state layout under `~/.merlya/`.

use std::path::PathBuf;

pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> std::io::Result<Self> {
        let base = match std::env::var_os("MERLYA_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| std::io::Error::other("cannot locate the home directory"))?
                .join(".merlya"),
        };
        std::fs::create_dir_all(base.join("logs"))?;
        Ok(Self { base })
    }

    pub fn inventory_db(&self) -> PathBuf {
        self.base.join("inventory.db")
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.yaml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }
}
