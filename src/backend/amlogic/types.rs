//! Type definitions for the Amlogic backend.
//!
//! This module contains the display mode model, the canonical mode identifier, and the sysfs
//! paths used by the backend.

use std::fmt;

use bitflags::bitflags;

// =============================================================================
// Sysfs Paths
// =============================================================================

pub const DISP_CAP: &str = "/sys/class/amhdmitx/amhdmitx0/disp_cap";
pub const FRAC_RATE_POLICY: &str = "/sys/class/amhdmitx/amhdmitx0/frac_rate_policy";
pub const HPD_STATE: &str = "/sys/class/amhdmitx/amhdmitx0/hpd_state";
pub const RAW_EDID: &str = "/sys/class/amhdmitx/amhdmitx0/rawedid";
pub const OUTPUT_RGB: &str = "/sys/class/amhdmitx/amhdmitx0/output_rgb";
pub const HDMITX_ATTR: &str = "/sys/class/amhdmitx/amhdmitx0/attr";
pub const HDMITX_DEBUG: &str = "/sys/class/amhdmitx/amhdmitx0/debug";
pub const HDMITX_CONFIG: &str = "/sys/class/amhdmitx/amhdmitx0/config";
pub const DISPLAY_MODE: &str = "/sys/class/display/mode";
pub const RANGE_CONTROL: &str = "/sys/module/am_vecm/parameters/range_control";

pub fn framebuffer_attr(framebuffer: &str, attr: &str) -> String {
    format!("/sys/class/graphics/{framebuffer}/{attr}")
}

// =============================================================================
// Display Modes
// =============================================================================

bitflags! {
    /// Scan and stereo layout of a display mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        const INTERLACED = 1 << 0;
        const MODE3DSBS = 1 << 1;
        const MODE3DTB = 1 << 2;
        /// Not part of the mode mask: the GUI surface is smaller than the screen.
        const UPSCALED = 1 << 3;

        /// Bits that distinguish one output mode from another.
        const MODE_MASK = Self::INTERLACED.bits() | Self::MODE3DSBS.bits() | Self::MODE3DTB.bits();
    }
}

impl ModeFlags {
    fn scan_tag(self) -> char {
        if self.contains(Self::INTERLACED) {
            'i'
        } else {
            'p'
        }
    }

    fn stereo_tag(self) -> &'static str {
        if self.contains(Self::MODE3DSBS) {
            "sbs"
        } else if self.contains(Self::MODE3DTB) {
            "tab"
        } else {
            "std"
        }
    }
}

/// One mode the display reports as supported.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayMode {
    /// Hardware mode name written to the display driver, e.g. `1080p60hz`.
    pub name: String,
    /// Size of the GUI surface.
    pub width: u32,
    pub height: u32,
    /// Size of the signal sent to the display.
    pub screen_width: u32,
    pub screen_height: u32,
    pub refresh_rate: f64,
    pub flags: ModeFlags,
}

impl DisplayMode {
    pub fn identifier(&self) -> ModeIdentifier {
        ModeIdentifier::from_mode(self)
    }

    pub fn is_interlaced(&self) -> bool {
        self.flags.contains(ModeFlags::INTERLACED)
    }

    /// Whether the refresh rate is an NTSC 1000/1001 rate such as 59.94.
    pub fn is_fractional(&self) -> bool {
        (self.refresh_rate - self.refresh_rate.round()).abs() > 0.001
    }

    /// Whether both modes drive the output identically.
    pub fn same_output(&self, other: &DisplayMode) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.screen_width == other.screen_width
            && self.screen_height == other.screen_height
            && self.refresh_rate == other.refresh_rate
            && (self.flags & ModeFlags::MODE_MASK) == (other.flags & ModeFlags::MODE_MASK)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}{} @ {:.2} Hz",
            self.screen_width,
            self.screen_height,
            if self.is_interlaced() { "i" } else { "" },
            self.refresh_rate,
        )
    }
}

// =============================================================================
// Mode Identifiers
// =============================================================================

/// Ordering key used to rank fallback candidates.
///
/// Refresh is in units of 1e-5 Hz, the precision of the identifier encoding, so ordering keys
/// is the same as comparing the fixed-width identifier fields as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RankKey {
    pub screen_width: u32,
    pub screen_height: u32,
    pub refresh: u64,
}

impl RankKey {
    /// Starting point of the fallback search. Width leads the key, so every mode with a
    /// nonzero width clears it.
    pub const FLOOR: RankKey = RankKey {
        screen_width: 0,
        screen_height: 480,
        refresh: 24_00000,
    };
}

/// Canonical fixed-width encoding of a display mode.
///
/// The layout is `WWWWWHHHHHRRR.RRRRRst` where `s` is `i` or `p` and `t` is `std`, `sbs` or
/// `tab`, for example `0192001080060.00000pstd`. This string is persisted in user settings, so
/// its formatting must never change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModeIdentifier {
    text: String,
    key: RankKey,
    flags: ModeFlags,
}

impl ModeIdentifier {
    /// Length of a well-formed identifier.
    pub const LEN: usize = 23;

    pub fn from_mode(mode: &DisplayMode) -> Self {
        let flags = mode.flags & ModeFlags::MODE_MASK;
        let refresh = format!("{:09.5}", mode.refresh_rate);
        let text = format!(
            "{:05}{:05}{refresh}{}{}",
            mode.screen_width,
            mode.screen_height,
            flags.scan_tag(),
            flags.stereo_tag(),
        );

        let key = RankKey {
            screen_width: mode.screen_width,
            screen_height: mode.screen_height,
            refresh: parse_refresh(&refresh).unwrap_or(u64::MAX),
        };

        Self { text, key, flags }
    }

    /// Parses a well-formed identifier, rejecting anything else.
    pub fn parse(text: &str) -> Option<Self> {
        if text.len() != Self::LEN || !text.is_ascii() {
            return None;
        }

        let screen_width = parse_digits(&text[0..5])?;
        let screen_height = parse_digits(&text[5..10])?;
        let refresh = parse_refresh(&text[10..19])?;

        let mut flags = match &text[19..20] {
            "i" => ModeFlags::INTERLACED,
            "p" => ModeFlags::empty(),
            _ => return None,
        };
        match &text[20..] {
            "std" => (),
            "sbs" => flags |= ModeFlags::MODE3DSBS,
            "tab" => flags |= ModeFlags::MODE3DTB,
            _ => return None,
        }

        Some(Self {
            text: text.to_owned(),
            key: RankKey {
                screen_width,
                screen_height,
                refresh,
            },
            flags,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn rank_key(&self) -> RankKey {
        self.key
    }

    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    /// Refresh rate with the identifier's precision.
    pub fn refresh_rate(&self) -> f64 {
        self.key.refresh as f64 / 1e5
    }
}

impl fmt::Display for ModeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn parse_digits(text: &str) -> Option<u32> {
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Parses `RRR.RRRRR` into 1e-5 Hz units.
fn parse_refresh(text: &str) -> Option<u64> {
    let (int, frac) = text.split_once('.')?;
    if int.is_empty() || frac.len() != 5 {
        return None;
    }
    let int = u64::from(parse_digits(int)?);
    let frac = u64::from(parse_digits(frac)?);
    Some(int * 100_000 + frac)
}

// =============================================================================
// Window System State
// =============================================================================

/// Stereo layout the renderer wants on the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoMode {
    #[default]
    Off,
    SideBySide,
    TopAndBottom,
}

impl StereoMode {
    /// Value for the HDMI transmitter `config` attribute.
    pub fn hdmitx_config(self) -> &'static str {
        match self {
            StereoMode::Off => "3doff",
            StereoMode::SideBySide => "3dlr",
            StereoMode::TopAndBottom => "3dtb",
        }
    }
}

/// A request to realize a window in a given mode.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRequest {
    pub mode: DisplayMode,
    pub fullscreen: bool,
    pub stereo: StereoMode,
}

/// The native window handed to EGL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeWindow {
    pub width: u32,
    pub height: u32,
}

/// The mode chosen as the desktop resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct DesktopSelection {
    pub identifier: ModeIdentifier,
    pub mode: DisplayMode,
    /// Position in the probed catalog, `None` when seeded from the active mode.
    pub index: Option<usize>,
    /// Whether the mode matched the persisted setting exactly.
    pub exact: bool,
}

/// Messages posted to the main thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMessage {
    /// The attached display changed; resolutions must be probed again.
    Resync,
}
