//! Configuration for PTY sessions
//!
//! Sources are layered with the usual precedence:
//! CLI > environment variables > config file > defaults.
//! The file is TOML and lives at `<config dir>/crosspty/config.toml`.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::size::{WindowSize, DEFAULT_COLS, DEFAULT_ROWS};

/// CLI arguments for the `crosspty` runner
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "crosspty")]
#[command(version)]
#[command(about = "Run a command on a pseudoterminal and relay its I/O", long_about = None)]
pub struct CliArgs {
    /// Path to custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Initial columns
    #[arg(long, value_name = "COLS")]
    pub cols: Option<u16>,

    /// Initial rows
    #[arg(long, value_name = "ROWS")]
    pub rows: Option<u16>,

    /// Working directory of the child
    #[arg(short = 'C', long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Value of TERM for the child
    #[arg(long, value_name = "TERM")]
    pub term: Option<String>,

    /// Kill the child after this many seconds
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Command to run instead of the configured shell
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Settings for one PTY session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// Initial columns; zero selects the default
    pub cols: u16,
    /// Initial rows; zero selects the default
    pub rows: u16,
    /// Program to run; the platform shell when unset
    pub shell: Option<String>,
    /// Arguments passed to `shell`
    pub args: Vec<String>,
    /// Value of TERM for the child
    pub term: String,
    /// Extra environment for the child
    pub env: BTreeMap<String, String>,
    /// Working directory of the child
    pub working_dir: Option<PathBuf>,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            shell: None,
            args: Vec::new(),
            term: "xterm-256color".to_string(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl ConfigError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        ConfigError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Config error in '{}': {}", field, self.message)
        } else {
            write!(f, "Config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl PtyConfig {
    /// Load configuration with full precedence:
    /// CLI args > environment variables > config file > defaults
    pub fn load_with_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = PtyConfig::default();

        let config_path = args.config.clone().or_else(Self::default_config_path);
        if let Some(path) = &config_path {
            if path.exists() {
                match Self::load_from_file(path) {
                    Ok(file_config) => config = file_config,
                    // An explicitly named file must parse
                    Err(e) if args.config.is_some() => return Err(e),
                    Err(e) => tracing::warn!("Failed to load config from {:?}: {}", path, e),
                }
            } else if args.config.is_some() {
                return Err(ConfigError {
                    message: format!("Config file {} does not exist", path.display()),
                    field: None,
                });
            }
        }

        config.apply_env_vars();
        config.apply_cli_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from the default file, if there is one
    pub fn load() -> Option<Self> {
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            return None;
        }
        Self::load_from_file(&config_path).ok()
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("Failed to read config file: {}", e),
            field: None,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError {
            message: format!("Failed to parse config file: {}", e),
            field: None,
        })
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |e: std::io::Error| ConfigError {
            message: format!("Failed to write config file: {}", e),
            field: None,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError {
            message: format!("Failed to serialize config: {}", e),
            field: None,
        })?;
        fs::write(path, content).map_err(io_err)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("crosspty").join("config.toml"))
    }

    /// Apply `CROSSPTY_*` environment variables
    pub fn apply_env_vars(&mut self) {
        self.apply_env_from(|key| env::var(key).ok());
    }

    /// Apply `CROSSPTY_*` variables read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CROSSPTY_SHELL") {
            self.shell = Some(val);
        }
        if let Some(val) = lookup("CROSSPTY_TERM") {
            self.term = val;
        }
        if let Some(val) = lookup("CROSSPTY_COLS") {
            if let Ok(cols) = val.parse() {
                self.cols = cols;
            }
        }
        if let Some(val) = lookup("CROSSPTY_ROWS") {
            if let Ok(rows) = val.parse() {
                self.rows = rows;
            }
        }
    }

    /// Apply CLI arguments to config
    pub fn apply_cli_args(&mut self, args: &CliArgs) {
        if let Some(cols) = args.cols {
            self.cols = cols;
        }
        if let Some(rows) = args.rows {
            self.rows = rows;
        }
        if let Some(dir) = &args.cwd {
            self.working_dir = Some(dir.clone());
        }
        if let Some(term) = &args.term {
            self.term = term.clone();
        }
        if let Some((program, rest)) = args.command.split_first() {
            self.shell = Some(program.clone());
            self.args = rest.to_vec();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                return Err(ConfigError::field("shell", "Shell must not be empty"));
            }
        }
        if self.term.is_empty() {
            return Err(ConfigError::field("term", "TERM must not be empty"));
        }
        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ConfigError::field(
                    "env",
                    format!("Invalid environment variable name '{}'", key),
                ));
            }
        }
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(ConfigError::field(
                    "working_dir",
                    format!("{} is not a directory", dir.display()),
                ));
            }
        }
        Ok(())
    }

    /// Initial window size, with zero dimensions replaced by defaults
    pub fn size(&self) -> WindowSize {
        WindowSize::new(self.cols, self.rows).normalized()
    }

    /// The program to run
    pub fn effective_shell(&self) -> String {
        self.shell.clone().unwrap_or_else(default_shell)
    }

    /// Build the command this configuration describes
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(self.effective_shell())
            .args(self.args.iter().cloned())
            .env("TERM", &self.term);
        for (key, value) in &self.env {
            cmd = cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd = cmd.current_dir(dir);
        }
        cmd
    }
}

/// The user's shell, falling back to the platform default
pub fn default_shell() -> String {
    if cfg!(windows) {
        env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    } else {
        env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PtyConfig::default();
        assert_eq!((config.cols, config.rows), (80, 24));
        assert_eq!(config.term, "xterm-256color");
        assert!(config.shell.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_parsing() {
        let toml_str = r#"
            cols = 132
            shell = "/bin/bash"
            args = ["-l"]

            [env]
            LANG = "C.UTF-8"
        "#;
        let config: PtyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cols, 132);
        assert_eq!(config.rows, 24);
        assert_eq!(config.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.args, ["-l"]);
        assert_eq!(config.env.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert_eq!(config.term, "xterm-256color");
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = PtyConfig::default();
        config.rows = 50;
        config.env.insert("EDITOR".to_string(), "vi".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = PtyConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cols = \"wide\"").unwrap();

        let err = PtyConfig::load_from_file(&path).unwrap_err();
        assert!(err.message.contains("Failed to parse"), "{}", err);
    }

    #[test]
    fn test_load_with_args_missing_explicit_file() {
        let args = CliArgs {
            config: Some(PathBuf::from("/nonexistent/crosspty/config.toml")),
            ..CliArgs::default()
        };
        assert!(PtyConfig::load_with_args(&args).is_err());
    }

    #[test]
    fn test_load_with_args_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cols = 100\nrows = 40\nshell = \"/bin/sh\"\n").unwrap();

        let args = CliArgs {
            config: Some(path),
            rows: Some(30),
            command: vec!["cat".to_string(), "-u".to_string()],
            ..CliArgs::default()
        };
        let config = PtyConfig::load_with_args(&args).unwrap();
        assert_eq!(config.cols, 100);
        assert_eq!(config.rows, 30);
        assert_eq!(config.shell.as_deref(), Some("cat"));
        assert_eq!(config.args, ["-u"]);
    }

    #[test]
    fn test_apply_env_from() {
        let mut config = PtyConfig::default();
        config.apply_env_from(|key| match key {
            "CROSSPTY_SHELL" => Some("/bin/zsh".to_string()),
            "CROSSPTY_COLS" => Some("120".to_string()),
            "CROSSPTY_ROWS" => Some("many".to_string()),
            _ => None,
        });
        assert_eq!(config.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.cols, 120);
        // unparsable values are ignored
        assert_eq!(config.rows, 24);
    }

    #[test]
    fn test_cli_args_parse_trailing_command() {
        let args = CliArgs::parse_from(["crosspty", "--cols", "90", "--", "ls", "-la"]);
        assert_eq!(args.cols, Some(90));
        assert_eq!(args.command, ["ls", "-la"]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PtyConfig::default();
        assert!(config.validate().is_ok());

        config.shell = Some("  ".to_string());
        assert_eq!(config.validate().unwrap_err().field.as_deref(), Some("shell"));
        config.shell = None;

        config.env.insert("BAD=KEY".to_string(), "x".to_string());
        assert_eq!(config.validate().unwrap_err().field.as_deref(), Some("env"));
        config.env.clear();

        config.working_dir = Some(PathBuf::from("/nonexistent/crosspty-dir"));
        assert_eq!(
            config.validate().unwrap_err().field.as_deref(),
            Some("working_dir")
        );
    }

    #[test]
    fn test_size_normalizes_zero() {
        let config = PtyConfig {
            cols: 0,
            rows: 0,
            ..PtyConfig::default()
        };
        assert_eq!(config.size(), WindowSize::default());
    }

    #[test]
    fn test_command_sets_term_and_env() {
        let mut config = PtyConfig {
            shell: Some("/bin/sh".to_string()),
            args: vec!["-c".to_string(), "true".to_string()],
            ..PtyConfig::default()
        };
        config.env.insert("FOO".to_string(), "bar".to_string());

        let cmd = config.command();
        assert_eq!(cmd.argv(), ["/bin/sh", "-c", "true"]);
        let env = cmd.get_env().unwrap();
        assert!(env.iter().any(|kv| kv == "TERM=xterm-256color"));
        assert!(env.iter().any(|kv| kv == "FOO=bar"));
    }
}
