use std::path::Path;
use std::process::{Command, Stdio};

/// Environment variable whose `SetEnv` value in ~/.ssh/config names a colour or theme.
pub const MARKER: &str = "TERMINAL_THEME";

/// Ask ssh for the effective config of `host` and return the marker value, if any.
///
/// Any failure (ssh missing, bad host, no marker) yields `None`.
pub fn lookup_marker(ssh: &Path, host: &str) -> Option<String> {
    let output = Command::new(ssh)
        .arg("-G")
        .arg("--")
        .arg(host)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!(host, status = ?output.status, "ssh -G failed");
        return None;
    }
    let value = parse_marker(&String::from_utf8_lossy(&output.stdout));
    tracing::debug!(host, marker = ?value, "scanned ssh config");
    value
}

/// Find `setenv ... TERMINAL_THEME=value ...` in `ssh -G` output.
pub fn parse_marker(output: &str) -> Option<String> {
    let prefix = format!("{}=", MARKER);
    output
        .lines()
        .map(str::trim_start)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let (key, rest) = line.split_once(char::is_whitespace)?;
            key.eq_ignore_ascii_case("setenv").then_some(rest)
        })
        .flat_map(str::split_whitespace)
        .find_map(|pair| pair.strip_prefix(&prefix))
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
