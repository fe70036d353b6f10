use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::color::{Color, ColorParseError};

#[cfg(target_os = "macos")]
const BUNDLED_RESOURCES: &str = "/Applications/Ghostty.app/Contents/Resources/ghostty";
#[cfg(not(target_os = "macos"))]
const BUNDLED_RESOURCES: &str = "/usr/share/ghostty";

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("failed to read theme file {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("theme file {} has no background", path.display())]
    NoBackground { path: PathBuf },
    #[error("theme file {} has an invalid background", path.display())]
    Background {
        path: PathBuf,
        source: ColorParseError,
    },
    #[error("invalid theme name '{0}'")]
    Name(String),
}

/// Directory holding Ghostty theme files.
/// Honors GHOSTTY_RESOURCES_DIR, which Ghostty sets for its child shells.
pub fn default_dir() -> PathBuf {
    let resources = std::env::var_os("GHOSTTY_RESOURCES_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(BUNDLED_RESOURCES));
    resources.join("themes")
}

/// Read the `background` entry of the named Ghostty theme.
pub fn background(dir: &Path, name: &str) -> Result<Color, ThemeError> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ThemeError::Name(name.to_string()));
    }
    let path = dir.join(name);
    let content = std::fs::read_to_string(&path).map_err(|source| ThemeError::Read {
        path: path.clone(),
        source,
    })?;
    match parse_background(&content) {
        Some(Ok(color)) => Ok(color),
        Some(Err(source)) => Err(ThemeError::Background { path, source }),
        None => Err(ThemeError::NoBackground { path }),
    }
}

/// Theme files are `key = value` lines, e.g. `background = 202746`.
/// The last `background` line wins, matching Ghostty's own config semantics.
fn parse_background(content: &str) -> Option<Result<Color, ColorParseError>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| key.trim() == "background")
        .last()
        .map(|(_, value)| Color::parse(value.trim()))
}
