//! `config.yaml` loading. A missing file is the defaults; a malformed one
//! is a usage error, not a silent fallback.

use merlya::types::MerlyaConfig;
use std::path::Path;

pub fn load(path: &Path) -> Result<MerlyaConfig, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|e| format!("{}: {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MerlyaConfig::default()),
        Err(e) => Err(format!("{}: {e}", path.display())),
    }
}
