use std::path::PathBuf;

/// Default config file: `~/.config/gcectl/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("gcectl")
        .join("config.yaml")
}
