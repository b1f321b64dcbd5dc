//! Configuration for the amlwin display backend.
//!
//! The config is a KDL document with two sections: `video-screen` holds the options the user
//! sets through the media center's display settings, `debug` holds overrides for running on
//! unusual hardware or against a fake sysfs tree.

use std::path::{Path, PathBuf};

use miette::{Context, IntoDiagnostic};

mod screen_mode;

pub use crate::screen_mode::{ScreenMode, DESKTOP};

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, default)]
    pub video_screen: VideoScreen,
    #[knuffel(child, default)]
    pub debug: DebugConfig,
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct VideoScreen {
    #[knuffel(child, unwrap(argument), default)]
    pub screen_mode: ScreenMode,
    /// Force RGB output instead of YCbCr.
    #[knuffel(child)]
    pub force_rgb: bool,
    /// Use limited (16-235) quantization range.
    #[knuffel(child)]
    pub limited_range: bool,
    /// Force 4:2:2 chroma subsampling on the HDMI link.
    #[knuffel(child)]
    pub force_422: bool,
    /// Keep the HPD line locked so that TVs dropping HPD in standby don't reset the output.
    #[knuffel(child)]
    pub lock_hpd: bool,
    /// Delay, in tenths of a second, before the display is declared stable after a mode switch.
    #[knuffel(child, unwrap(argument), default)]
    pub delay_refresh_change: u16,
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct DebugConfig {
    /// Framebuffer device name, `fb0` when unset.
    #[knuffel(child, unwrap(argument))]
    pub framebuffer: Option<String>,
    /// Directory that sysfs paths are resolved against, `/` when unset.
    #[knuffel(child, unwrap(argument))]
    pub sysfs_root: Option<PathBuf>,
}

impl VideoScreen {
    pub fn screen_mode(&self) -> &str {
        self.screen_mode.as_str()
    }
}

impl DebugConfig {
    pub fn framebuffer(&self) -> &str {
        self.framebuffer.as_deref().unwrap_or("fb0")
    }

    pub fn sysfs_root(&self) -> &Path {
        self.sysfs_root.as_deref().unwrap_or(Path::new("/"))
    }
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let _span = tracy_client::span!("Config::load");

        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let config = Self::parse(
            path.file_name()
                .and_then(|x| x.to_str())
                .unwrap_or("config.kdl"),
            &contents,
        )
        .context("error parsing")?;
        tracing::debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        knuffel::parse(filename, text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[track_caller]
    fn do_parse(text: &str) -> Config {
        Config::parse("test.kdl", text)
            .map_err(miette::Report::new)
            .unwrap()
    }

    #[test]
    fn parse_full() {
        let parsed = do_parse(
            r#"
            video-screen {
                screen-mode "0192001080050.00000pstd"
                force-rgb
                limited-range
                force-422
                lock-hpd
                delay-refresh-change 15
            }

            debug {
                framebuffer "fb1"
                sysfs-root "/tmp/fake-sysfs"
            }
            "#,
        );

        assert_eq!(
            parsed,
            Config {
                video_screen: VideoScreen {
                    screen_mode: ScreenMode(String::from("0192001080050.00000pstd")),
                    force_rgb: true,
                    limited_range: true,
                    force_422: true,
                    lock_hpd: true,
                    delay_refresh_change: 15,
                },
                debug: DebugConfig {
                    framebuffer: Some(String::from("fb1")),
                    sysfs_root: Some(PathBuf::from("/tmp/fake-sysfs")),
                },
            }
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let parsed = do_parse("");
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.video_screen.screen_mode(), DESKTOP);
        assert!(parsed.video_screen.screen_mode.is_desktop());
        assert_eq!(parsed.debug.framebuffer(), "fb0");
        assert_eq!(parsed.debug.sysfs_root(), Path::new("/"));
    }

    #[test]
    fn desktop_sentinel_is_case_insensitive() {
        let parsed = do_parse(r#"video-screen { screen-mode "desktop"; }"#);
        assert!(parsed.video_screen.screen_mode.is_desktop());
    }

    #[test]
    fn legacy_screen_mode_is_kept_verbatim() {
        let parsed = do_parse(r#"video-screen { screen-mode "1280x720"; }"#);
        assert_eq!(parsed.video_screen.screen_mode(), "1280x720");
    }

    #[test]
    fn empty_screen_mode_is_an_error() {
        assert!(Config::parse("test.kdl", r#"video-screen { screen-mode ""; }"#).is_err());
    }

    #[test]
    fn non_string_screen_mode_is_an_error() {
        assert!(Config::parse("test.kdl", "video-screen { screen-mode 1080; }").is_err());
    }

    #[test]
    fn negative_delay_is_an_error() {
        assert!(Config::parse("test.kdl", "video-screen { delay-refresh-change -1; }").is_err());
    }
}
