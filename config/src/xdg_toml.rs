//! `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml` (or the platform
//! config dir when XDG_CONFIG_HOME is unset).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .ok_or_else(|| LoadError::XdgPath("no config directory available".to_string()))?;
    let path = base.join(app_name).join("config.toml");
    Ok(path.is_file().then_some(path))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns the `[env]` key-value pairs. Missing file or section yields an
/// empty map; unreadable or malformed TOML is an error.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = config_path(app_name)? else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_xdg_home<T>(dir: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    #[test]
    fn missing_config_returns_empty_map() {
        let map = load_env_map("arbiter-xdg-test-nonexistent").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn env_table_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("arbiter-xdg-test");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("config.toml"), "[env]\nKEY = \"value\"\n").unwrap();
        let map = with_xdg_home(dir.path(), || load_env_map("arbiter-xdg-test")).unwrap();
        assert_eq!(map.get("KEY").map(String::as_str), Some("value"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("arbiter-xdg-bad");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("config.toml"), "[[[not toml\n").unwrap();
        let result = with_xdg_home(dir.path(), || load_env_map("arbiter-xdg-bad"));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
