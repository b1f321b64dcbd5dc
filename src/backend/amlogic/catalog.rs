//! Display mode catalog.
//!
//! The HDMI transmitter driver lists the modes the attached display supports in `disp_cap`, one
//! hardware mode name per line, and reports the active mode in `/sys/class/display/mode`.

use std::sync::Arc;

use super::types::{
    DisplayMode, ModeFlags, DISPLAY_MODE, DISP_CAP, FRAC_RATE_POLICY,
};
use crate::sysfs::SysfsBridge;

/// Source of the modes the attached display supports.
pub trait ModeCatalog {
    /// All modes the display currently reports, empty if probing failed.
    fn probe(&self) -> Vec<DisplayMode>;

    /// The mode presently driving the output, if known.
    fn current_mode(&self) -> Option<DisplayMode>;
}

/// Catalog backed by the Amlogic HDMI transmitter sysfs attributes.
pub struct SysfsCatalog {
    sysfs: Arc<dyn SysfsBridge>,
}

impl SysfsCatalog {
    pub fn new(sysfs: Arc<dyn SysfsBridge>) -> Self {
        Self { sysfs }
    }

    fn has_frac_rate_policy(&self) -> bool {
        self.sysfs.exists(FRAC_RATE_POLICY)
    }
}

impl ModeCatalog for SysfsCatalog {
    fn probe(&self) -> Vec<DisplayMode> {
        let _span = tracy_client::span!("SysfsCatalog::probe");

        let caps = match self.sysfs.get_string(DISP_CAP) {
            Ok(caps) => caps,
            Err(err) => {
                warn!("error reading display capabilities: {err:?}");
                return Vec::new();
            }
        };

        let frac = self.has_frac_rate_policy();

        let mut modes = Vec::new();
        for line in caps.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(mode) = parse_mode_name(line) else {
                debug!("ignoring unknown display mode {line:?}");
                continue;
            };

            let fractional = if frac { fractional_variant(&mode) } else { None };
            modes.push(mode);
            modes.extend(fractional);
        }

        modes
    }

    fn current_mode(&self) -> Option<DisplayMode> {
        let name = self
            .sysfs
            .get_string(DISPLAY_MODE)
            .map_err(|err| warn!("error reading the active display mode: {err:?}"))
            .ok()?;

        let Some(mode) = parse_mode_name(&name) else {
            debug!("active display mode {name:?} is not a video mode");
            return None;
        };

        let policy = self.sysfs.get_int(FRAC_RATE_POLICY).unwrap_or(0);
        if policy == 1 {
            if let Some(fractional) = fractional_variant(&mode) {
                return Some(fractional);
            }
        }

        Some(mode)
    }
}

/// Parses an Amlogic hardware mode name such as `1080p60hz`, `576i`, `2160p24hz420` or
/// `smpte24hz`. A trailing `*`, which marks the display's native mode in `disp_cap`, is ignored.
pub fn parse_mode_name(name: &str) -> Option<DisplayMode> {
    let name = name.trim().trim_end_matches('*').trim();
    let lower = name.to_ascii_lowercase();

    // Chroma subsampling suffix, as in 2160p60hz420.
    let base = ["420", "422", "444"]
        .iter()
        .find_map(|suffix| lower.strip_suffix(suffix))
        .unwrap_or(lower.as_str());

    let (screen_width, screen_height, interlaced, rest) =
        if let Some(rest) = base.strip_prefix("4k2ksmpte") {
            (4096, 2160, false, rest)
        } else if let Some(rest) = base.strip_prefix("4k2k") {
            (3840, 2160, false, rest)
        } else if let Some(rest) = base.strip_prefix("smpte") {
            (4096, 2160, false, rest)
        } else {
            let digits = base.bytes().take_while(u8::is_ascii_digit).count();
            let lines: u32 = base[..digits].parse().ok()?;
            let interlaced = match base[digits..].chars().next()? {
                'i' => true,
                'p' => false,
                _ => return None,
            };
            let width = match lines {
                480 | 576 => 720,
                720 => 1280,
                1080 => 1920,
                2160 => 3840,
                _ => return None,
            };
            (width, lines, interlaced, &base[digits + 1..])
        };

    let refresh: u32 = if rest.is_empty() {
        match (screen_height, screen_width) {
            (576, _) => 50,
            (2160, 4096) => 24,
            _ => 60,
        }
    } else {
        let rate = rest.strip_suffix("hz")?;
        if rate.is_empty() || !rate.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rate.parse().ok()?
    };

    let mut flags = ModeFlags::empty();
    if interlaced {
        flags |= ModeFlags::INTERLACED;
    }

    // 2160-line modes scan out a 1080p GUI surface.
    let (width, height) = if screen_height > 1080 {
        flags |= ModeFlags::UPSCALED;
        (1920, 1080)
    } else {
        (screen_width, screen_height)
    };

    Some(DisplayMode {
        name: name.to_owned(),
        width,
        height,
        screen_width,
        screen_height,
        refresh_rate: f64::from(refresh),
        flags,
    })
}

/// The NTSC (1000/1001) variant of a 24, 30 or 60 Hz mode.
pub fn fractional_variant(mode: &DisplayMode) -> Option<DisplayMode> {
    if mode.is_fractional() {
        return None;
    }

    let rate = mode.refresh_rate.round() as u32;
    if !matches!(rate, 24 | 30 | 60) {
        return None;
    }

    Some(DisplayMode {
        refresh_rate: f64::from(rate) * 1000. / 1001.,
        ..mode.clone()
    })
}
