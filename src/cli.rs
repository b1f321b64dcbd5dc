use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::backend::amlogic::{select_desktop_mode, DisplayMode, ModeCatalog};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/amlwin/config.kdl`).
    ///
    /// This can also be set with the `AMLWIN_CONFIG` environment variable.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

#[derive(Subcommand)]
pub enum Sub {
    /// Run the display backend (the default).
    Run,
    /// Print the modes the attached display supports and the desktop selection.
    ListModes {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Validate the config file.
    Validate,
}

/// Where the config comes from, and whether it was asked for explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigPath {
    /// Set with `--config` or `$AMLWIN_CONFIG`; a missing file is an error.
    Explicit(PathBuf),
    /// The per-user default; a missing file means default settings.
    Default(PathBuf),
}

impl ConfigPath {
    pub fn path(&self) -> &Path {
        match self {
            ConfigPath::Explicit(path) | ConfigPath::Default(path) => path,
        }
    }
}

/// Resolves the config path: the command line first, then `$AMLWIN_CONFIG`, then the user's
/// config directory.
pub fn config_path(cli: Option<PathBuf>, env: Option<PathBuf>) -> Option<ConfigPath> {
    if let Some(path) = cli.or(env) {
        return Some(ConfigPath::Explicit(path));
    }

    let dirs = directories::ProjectDirs::from("", "", "amlwin")?;
    Some(ConfigPath::Default(dirs.config_dir().join("config.kdl")))
}

#[derive(Debug, Serialize)]
struct ModeEntry<'a> {
    name: &'a str,
    identifier: String,
    width: u32,
    height: u32,
    screen_width: u32,
    screen_height: u32,
    refresh_rate: f64,
    interlaced: bool,
    desktop: bool,
}

#[derive(Debug, Serialize)]
struct ModeList<'a> {
    current: Option<String>,
    desktop: Option<String>,
    exact: bool,
    modes: Vec<ModeEntry<'a>>,
}

/// Renders the probed modes and the desktop resolution picked for `setting`.
pub fn list_modes(catalog: &dyn ModeCatalog, setting: &str, json: bool) -> anyhow::Result<String> {
    let modes = catalog.probe();
    let current = catalog.current_mode();
    let selection = select_desktop_mode(&modes, setting, current.as_ref());
    let desktop_index = selection.as_ref().and_then(|sel| sel.index);

    let list = ModeList {
        current: current.as_ref().map(|mode| mode.identifier().to_string()),
        desktop: selection.as_ref().map(|sel| sel.identifier.to_string()),
        exact: selection.as_ref().is_some_and(|sel| sel.exact),
        modes: modes
            .iter()
            .enumerate()
            .map(|(idx, mode)| entry(mode, desktop_index == Some(idx)))
            .collect(),
    };

    if json {
        let mut out = serde_json::to_string_pretty(&list)?;
        out.push('\n');
        return Ok(out);
    }

    let mut out = String::new();
    for (entry, mode) in list.modes.iter().zip(&modes) {
        let marker = if entry.desktop { '*' } else { ' ' };
        out.push_str(&format!(
            "{marker} {:<14} {} {mode}\n",
            entry.name, entry.identifier
        ));
    }
    match &list.desktop {
        Some(desktop) if list.exact => out.push_str(&format!("desktop: {desktop}\n")),
        Some(desktop) => out.push_str(&format!("desktop: {desktop} (fallback)\n")),
        None => out.push_str("desktop: none\n"),
    }
    Ok(out)
}

fn entry(mode: &DisplayMode, desktop: bool) -> ModeEntry<'_> {
    ModeEntry {
        name: &mode.name,
        identifier: mode.identifier().to_string(),
        width: mode.width,
        height: mode.height,
        screen_width: mode.screen_width,
        screen_height: mode.screen_height,
        refresh_rate: mode.refresh_rate,
        interlaced: mode.is_interlaced(),
        desktop,
    }
}
