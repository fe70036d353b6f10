use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::color::{Color, ColorParseError};
use crate::resolver::{ColorRules, HostPattern, HostRule, Resolution, Source};
use crate::ssh_config;
use crate::theme::{self, ThemeError};

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "SSH_TINT_CONFIG";

const DEFAULT_QUERY_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("rule {index} has an invalid pattern '{pattern}'")]
    Pattern {
        index: usize,
        pattern: String,
        source: glob::PatternError,
    },
    #[error("rule {index} has an empty pattern")]
    EmptyPattern { index: usize },
    #[error("invalid colour '{value}' for {field}")]
    Color {
        field: String,
        value: String,
        source: ColorParseError,
    },
    #[error("invalid theme for {field}")]
    Theme { field: String, source: ThemeError },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ssh: Option<String>,
    default: Option<String>,
    query_timeout_ms: Option<u64>,
    theme_dir: Option<String>,
    #[serde(default)]
    ssh_config_marker: bool,
    #[serde(default, rename = "rule")]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    pattern: String,
    color: String,
    #[serde(default)]
    kind: PatternKind,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PatternKind {
    #[default]
    Glob,
    Exact,
}

/// Validated configuration. Every colour and pattern in here is known good.
#[derive(Debug, Clone)]
pub struct Config {
    pub ssh: PathBuf,
    pub rules: ColorRules,
    pub query_timeout: Duration,
    pub theme_dir: PathBuf,
    pub ssh_config_marker: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh: PathBuf::from("ssh"),
            rules: ColorRules::default(),
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            theme_dir: theme::default_dir(),
            ssh_config_marker: false,
        }
    }
}

impl Config {
    /// `$SSH_TINT_CONFIG`, else `<config dir>/ssh-tint/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("ssh-tint").join("config.toml"))
    }

    /// Load and validate the config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ssh) = raw.ssh.as_deref() {
            config.ssh = PathBuf::from(expand_path(ssh));
        }
        if let Some(dir) = raw.theme_dir.as_deref() {
            config.theme_dir = PathBuf::from(expand_path(dir));
        }
        if let Some(ms) = raw.query_timeout_ms {
            config.query_timeout = Duration::from_millis(ms);
        }
        config.ssh_config_marker = raw.ssh_config_marker;

        let default = match raw.default.as_deref() {
            Some(spec) => Some(config.color_from_spec(spec, "default")?),
            None => None,
        };

        let mut rules = Vec::with_capacity(raw.rules.len());
        for (index, rule) in raw.rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(ConfigError::EmptyPattern { index });
            }
            let pattern = match rule.kind {
                PatternKind::Exact => HostPattern::exact(&rule.pattern),
                PatternKind::Glob => {
                    HostPattern::glob(&rule.pattern).map_err(|source| ConfigError::Pattern {
                        index,
                        pattern: rule.pattern.clone(),
                        source,
                    })?
                }
            };
            let color = config.color_from_spec(&rule.color, &format!("rule {}", index))?;
            rules.push(HostRule { pattern, color });
        }

        config.rules = ColorRules::new(rules, default);
        Ok(config)
    }

    /// Turn a colour spelling or `theme:<name>` into a colour.
    pub fn color_from_spec(&self, spec: &str, field: &str) -> Result<Color, ConfigError> {
        if let Some(name) = spec.strip_prefix("theme:") {
            return theme::background(&self.theme_dir, name).map_err(|source| {
                ConfigError::Theme {
                    field: field.to_string(),
                    source,
                }
            });
        }
        Color::parse(spec).map_err(|source| ConfigError::Color {
            field: field.to_string(),
            value: spec.to_string(),
            source,
        })
    }

    /// Rules first, then the ssh config marker (when enabled), then the default.
    pub fn resolve(&self, host: &str) -> Option<Resolution> {
        self.rules
            .first_match(host)
            .or_else(|| self.marker_color(host))
            .or_else(|| self.rules.fallback())
    }

    fn marker_color(&self, host: &str) -> Option<Resolution> {
        if !self.ssh_config_marker {
            return None;
        }
        let value = ssh_config::lookup_marker(&self.ssh, host)?;
        // The marker may name a colour, a `theme:` or a bare theme name
        let color = self
            .color_from_spec(&value, ssh_config::MARKER)
            .or_else(|_| theme::background(&self.theme_dir, &value))
            .map_err(|e| tracing::warn!(host, value = %value, error = ?e, "unusable ssh config marker"))
            .ok()?;
        Some(Resolution {
            color,
            source: Source::SshConfig,
        })
    }
}

/// Expand a leading `~/` and `$NAME` references (uppercase, digits, `_`).
/// Unset variables expand to nothing.
pub fn expand_path(input: &str) -> String {
    let input = match input.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => format!("{}/{}", home.display(), rest),
            None => input.to_string(),
        },
        None => input.to_string(),
    };

    let mut expanded = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            expanded.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_uppercase() || next.is_ascii_digit() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            expanded.push('$');
        } else if let Ok(value) = std::env::var(&name) {
            expanded.push_str(&value);
        }
    }
    expanded
}
