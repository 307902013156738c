//! Language-server discovery/config — the "external config collaborator"
//! spec §4.D refers to. Not part of the multiplexing core, but every
//! `Workspace::start` needs somewhere to look up a command line, so this
//! ambient piece is carried the way the teacher's `config/mod.rs` carries
//! `DaemonConfig`: built-in defaults, overridable by a TOML file under
//! `XDG_CONFIG_HOME`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

/// Command line and file extensions for one language's LSP server.
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageServerConfig {
    pub language_id: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub init_options: Option<serde_json::Value>,
}

impl LanguageServerConfig {
    fn new(language_id: &str, command: &[&str], extensions: &[&str]) -> Self {
        Self {
            language_id: language_id.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            init_options: None,
        }
    }
}

/// Built-in command lines for common language servers, mirroring
/// `LspConfig::builtin_defaults` in the teacher's `lsp/model.rs` but
/// extended with the languages spec.md's examples reference (Go, Rust,
/// Python, Lua).
pub fn builtin_defaults() -> Vec<LanguageServerConfig> {
    vec![
        LanguageServerConfig::new("rust", &["rust-analyzer"], &["rs"]),
        LanguageServerConfig::new(
            "typescript",
            &["typescript-language-server", "--stdio"],
            &["ts", "tsx"],
        ),
        LanguageServerConfig::new(
            "javascript",
            &["typescript-language-server", "--stdio"],
            &["js", "jsx", "mjs", "cjs"],
        ),
        LanguageServerConfig::new("go", &["gopls"], &["go"]),
        LanguageServerConfig::new("python", &["pylsp"], &["py", "pyi"]),
        LanguageServerConfig::new("lua", &["lua-language-server"], &["lua"]),
    ]
}

#[derive(Deserialize, Default)]
struct TomlServers {
    #[serde(default)]
    server: HashMap<String, TomlServer>,
}

#[derive(Deserialize)]
struct TomlServer {
    command: Vec<String>,
    #[serde(default)]
    extensions: Vec<String>,
}

/// Registry of per-language server configs: built-ins overlaid with any
/// `servers.toml` found under `XDG_CONFIG_HOME/lspcmd` (or `config_dir`).
pub struct ServerConfigs {
    by_language: HashMap<String, LanguageServerConfig>,
    extension_to_language: HashMap<String, String>,
}

impl ServerConfigs {
    pub fn load(config_dir: Option<PathBuf>) -> Self {
        let mut by_language: HashMap<String, LanguageServerConfig> = builtin_defaults()
            .into_iter()
            .map(|c| (c.language_id.clone(), c))
            .collect();

        let config_dir = config_dir.unwrap_or_else(default_config_dir);
        let toml_path = config_dir.join("servers.toml");
        if let Ok(contents) = std::fs::read_to_string(&toml_path) {
            match toml::from_str::<TomlServers>(&contents) {
                Ok(parsed) => {
                    for (language_id, server) in parsed.server {
                        debug!(language = %language_id, path = %toml_path.display(), "loaded server override");
                        by_language.insert(
                            language_id.clone(),
                            LanguageServerConfig {
                                language_id,
                                command: server.command,
                                extensions: server.extensions,
                                init_options: None,
                            },
                        );
                    }
                }
                Err(e) => {
                    warn!(path = %toml_path.display(), error = %e, "failed to parse servers.toml, using built-in defaults");
                }
            }
        }

        let mut extension_to_language = HashMap::new();
        for cfg in by_language.values() {
            for ext in &cfg.extensions {
                extension_to_language.insert(ext.clone(), cfg.language_id.clone());
            }
        }

        Self {
            by_language,
            extension_to_language,
        }
    }

    pub fn for_language(&self, language_id: &str) -> Option<&LanguageServerConfig> {
        self.by_language.get(language_id)
    }

    /// Derive a language id from a file's extension.
    pub fn language_for_file(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?;
        self.extension_to_language.get(ext).cloned()
    }
}

fn default_config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from(".config"))
        })
        .join("lspcmd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults_cover_common_languages() {
        let configs = ServerConfigs::load(Some(PathBuf::from("/nonexistent")));
        assert!(configs.for_language("rust").is_some());
        assert!(configs.for_language("python").is_some());
        assert_eq!(
            configs.language_for_file(Path::new("src/main.rs")),
            Some("rust".to_string())
        );
        assert_eq!(
            configs.language_for_file(Path::new("app.tsx")),
            Some("typescript".to_string())
        );
        assert_eq!(configs.language_for_file(Path::new("README.md")), None);
    }

    #[test]
    fn toml_override_replaces_builtin_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("servers.toml"),
            r#"
            [server.rust]
            command = ["my-custom-analyzer", "--stdio"]
            extensions = ["rs"]
            "#,
        )
        .unwrap();

        let configs = ServerConfigs::load(Some(dir.path().to_path_buf()));
        let rust = configs.for_language("rust").unwrap();
        assert_eq!(rust.command, vec!["my-custom-analyzer", "--stdio"]);
    }
}
