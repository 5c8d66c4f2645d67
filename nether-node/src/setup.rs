use std::fs;
use std::path::Path;

use tracing::info;

use crate::config::NodeConfig;

/// Loads the node config, writing a default one first when `path` is missing.
/// A `listen` override is applied in memory only.
pub fn ensure_config(path: &Path, listen: Option<&str>) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    if !path.exists() {
        info!("⚠️ No config found. Writing defaults to {}", path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut config = NodeConfig::default();
        if let Some(addr) = listen {
            config.listen_addr = addr.to_string();
        }
        config.save_to_file(path)?;
        info!("✅ Config written");
    }

    let mut config = NodeConfig::load_from_file(path)?;
    if let Some(addr) = listen {
        config.listen_addr = addr.to_string();
    }
    fs::create_dir_all(&config.data_dir)?;
    Ok(config)
}

/// Short label for log file names: the config's parent directory, like `node1`
/// for `node1/config.json`.
pub fn node_name(config_path: &Path) -> String {
    config_path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("node")
        .to_string()
}
