use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::BridgeConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["pontis.toml", "pontis.yaml", "pontis.yml", "pontis.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./pontis.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/pontis/pontis.{toml,yaml,yml,json}` (user-global)
///
/// Returns `BridgeConfig::default()` if no config file is found.
pub fn discover_and_load() -> BridgeConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    BridgeConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/pontis/
    if let Some(dirs) = directories::ProjectDirs::from("", "", "pontis") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<BridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::io::Write};

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pontis.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[telegram]\npublic_token = \"t1\"").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.telegram.public_token.expose_secret(), "t1");
    }

    #[test]
    fn loads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pontis.json");
        std::fs::write(&path, r#"{"http": {"port": 9999}}"#).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.http.port, 9999);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config(Path::new("/nonexistent/pontis.toml")).is_err());
    }

    #[test]
    fn unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pontis.ini");
        std::fs::write(&path, "whatever").unwrap();
        assert!(load_config(&path).is_err());
    }
}
