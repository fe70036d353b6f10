use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A pane colour, normalised to 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorParseError {
    #[error("colour is empty")]
    Empty,
    #[error("'{0}' is not a hex colour (expected #rgb or #rrggbb)")]
    Hex(String),
    #[error("'{0}' is not an X11 colour spec (expected rgb:r/g/b)")]
    X11(String),
    #[error("unknown colour name '{0}'")]
    UnknownName(String),
}

/// Named colours accepted in the config file.
const NAMED: &[(&str, Color)] = &[
    ("black", Color::rgb(0x00, 0x00, 0x00)),
    ("white", Color::rgb(0xff, 0xff, 0xff)),
    ("red", Color::rgb(0xff, 0x00, 0x00)),
    ("maroon", Color::rgb(0x80, 0x00, 0x00)),
    ("green", Color::rgb(0x00, 0x80, 0x00)),
    ("lime", Color::rgb(0x00, 0xff, 0x00)),
    ("olive", Color::rgb(0x80, 0x80, 0x00)),
    ("yellow", Color::rgb(0xff, 0xff, 0x00)),
    ("orange", Color::rgb(0xff, 0xa5, 0x00)),
    ("blue", Color::rgb(0x00, 0x00, 0xff)),
    ("navy", Color::rgb(0x00, 0x00, 0x80)),
    ("teal", Color::rgb(0x00, 0x80, 0x80)),
    ("cyan", Color::rgb(0x00, 0xff, 0xff)),
    ("magenta", Color::rgb(0xff, 0x00, 0xff)),
    ("purple", Color::rgb(0x80, 0x00, 0x80)),
    ("gray", Color::rgb(0x80, 0x80, 0x80)),
    ("grey", Color::rgb(0x80, 0x80, 0x80)),
];

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse any accepted spelling: `#rgb`, `#rrggbb`, `rrggbb`,
    /// `rgb:r/g/b` (1-4 hex digits per channel) or a colour name.
    pub fn parse(input: &str) -> Result<Self, ColorParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ColorParseError::Empty);
        }

        if let Some(hex) = input.strip_prefix('#') {
            return parse_hex(hex).ok_or_else(|| ColorParseError::Hex(input.to_string()));
        }

        if let Some(spec) = input.strip_prefix("rgb:") {
            return parse_x11(spec).ok_or_else(|| ColorParseError::X11(input.to_string()));
        }

        // Bare six-digit hex, as written in Ghostty theme files
        if input.len() == 6 {
            if let Some(color) = parse_hex(input) {
                return Ok(color);
            }
        }

        let lower = input.to_ascii_lowercase();
        NAMED
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, color)| *color)
            .ok_or_else(|| ColorParseError::UnknownName(input.to_string()))
    }

    /// Payload for OSC 10/11/12 set sequences.
    pub fn osc_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 => {
            let mut channels = hex
                .chars()
                .map(|c| c.to_digit(16).map(|d| (d * 17) as u8));
            Some(Color::rgb(channels.next()??, channels.next()??, channels.next()??))
        }
        6 => Some(Color::rgb(
            u8::from_str_radix(&hex[0..2], 16).ok()?,
            u8::from_str_radix(&hex[2..4], 16).ok()?,
            u8::from_str_radix(&hex[4..6], 16).ok()?,
        )),
        _ => None,
    }
}

/// X11 `rgb:` channels carry 1 to 4 hex digits and are scaled to 8 bits.
fn parse_x11(spec: &str) -> Option<Color> {
    let channels: Vec<&str> = spec.split('/').collect();
    if channels.len() != 3 {
        return None;
    }
    let mut out = [0u8; 3];
    for (slot, channel) in out.iter_mut().zip(&channels) {
        if channel.is_empty() || channel.len() > 4 {
            return None;
        }
        let value = u32::from_str_radix(channel, 16).ok()?;
        let max = (1u32 << (4 * channel.len() as u32)) - 1;
        *slot = ((value * 255 + max / 2) / max) as u8;
    }
    Some(Color::rgb(out[0], out[1], out[2]))
}
