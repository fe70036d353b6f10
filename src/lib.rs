//! Tint the Ghostty pane while an ssh session runs, and put it back afterwards.

pub mod color;
pub mod config;
pub mod destination;
pub mod logging;
pub mod resolver;
pub mod session;
pub mod ssh_config;
pub mod supervisor;
pub mod terminal;
pub mod theme;
