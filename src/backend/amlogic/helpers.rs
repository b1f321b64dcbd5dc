//! Pure helper functions for the Amlogic backend.
//!
//! This module contains stateless helper functions that don't require `&self` or `&mut self`.
//! They are pure computations that take inputs and return outputs without side effects.

use std::time::Duration;

use amlwin_config::DESKTOP;

use super::types::{DesktopSelection, DisplayMode, ModeIdentifier, RankKey};

// =============================================================================
// Desktop Resolution Selection
// =============================================================================

/// What the persisted screen mode setting asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredMode {
    /// A specific mode; an exact match wins, otherwise the best mode not above it.
    Identifier(ModeIdentifier),
    /// The setting could not be understood. Nothing matches exactly, fallbacks are capped at
    /// the given key, the mode the display is running.
    Unrecognized(Option<RankKey>),
}

impl DesiredMode {
    /// Resolves the persisted setting against the mode the display is currently running.
    pub fn resolve(setting: &str, current: Option<&ModeIdentifier>) -> Self {
        if setting == DESKTOP {
            return match current {
                Some(current) => DesiredMode::Identifier(current.clone()),
                None => DesiredMode::Unrecognized(None),
            };
        }

        // Older settings carry a leading screen number.
        let setting = if setting.len() == ModeIdentifier::LEN + 1 && setting.is_ascii() {
            &setting[1..]
        } else {
            setting
        };

        match ModeIdentifier::parse(setting) {
            Some(id) => DesiredMode::Identifier(id),
            None => {
                debug!("unrecognized screen mode setting {setting:?}");
                DesiredMode::Unrecognized(current.map(ModeIdentifier::rank_key))
            }
        }
    }

    fn exact(&self) -> Option<&ModeIdentifier> {
        match self {
            DesiredMode::Identifier(id) => Some(id),
            DesiredMode::Unrecognized(_) => None,
        }
    }

    fn ceiling(&self) -> Option<RankKey> {
        match self {
            DesiredMode::Identifier(id) => Some(id.rank_key()),
            DesiredMode::Unrecognized(key) => *key,
        }
    }
}

/// Picks the desktop resolution out of the probed catalog.
///
/// The first catalog entry whose identifier equals the desired one wins. Without an exact
/// match, the result is the entry with the greatest (width, height, refresh) that does not
/// exceed the desired mode and lies above [`RankKey::FLOOR`]; ties keep the earlier entry.
/// Returns `None` when nothing qualifies, in which case the caller keeps its previous choice.
pub fn select_desktop_mode(
    catalog: &[DisplayMode],
    setting: &str,
    current: Option<&DisplayMode>,
) -> Option<DesktopSelection> {
    let current_id = current.map(DisplayMode::identifier);
    let desired = DesiredMode::resolve(setting, current_id.as_ref());

    if let Some(current_id) = &current_id {
        info!("current output resolution is {current_id}");
    }
    match &desired {
        DesiredMode::Identifier(id) => info!("current display setting is {id}"),
        DesiredMode::Unrecognized(_) => info!("display setting {setting:?} is not a mode"),
    }

    let exact = desired.exact();
    let ceiling = desired.ceiling();

    let mut floor = RankKey::FLOOR;
    let mut fallback = None;

    for (idx, mode) in catalog.iter().enumerate() {
        let id = mode.identifier();

        if exact == Some(&id) {
            debug!("screen mode setting found at {idx}: {id}");
            return Some(DesktopSelection {
                identifier: id,
                mode: mode.clone(),
                index: Some(idx),
                exact: true,
            });
        }

        let Some(ceiling) = ceiling else {
            continue;
        };

        let key = id.rank_key();
        if key <= ceiling && key > floor {
            debug!("fallback resolution at {idx}: {id}");
            floor = key;
            fallback = Some((idx, id));
        }
    }

    fallback.map(|(idx, identifier)| DesktopSelection {
        identifier,
        mode: catalog[idx].clone(),
        index: Some(idx),
        exact: false,
    })
}

// =============================================================================
// Output Settings
// =============================================================================

/// Rewrites the HDMI transmitter `attr` value for the chroma subsampling setting.
///
/// The returned value ends in `now` so that the driver applies it immediately.
pub fn hdmitx_attr(attr: &str, force_422: bool) -> String {
    let chroma = ["444", "422", "420"]
        .iter()
        .filter_map(|c| attr.find(c))
        .min();

    let mut attr = attr.to_owned();
    if force_422 {
        match chroma {
            Some(pos) => attr.replace_range(pos..pos + 3, "422"),
            None => attr.push_str("422"),
        }
    } else if let Some(pos) = attr.find("422") {
        attr.replace_range(pos..pos + 3, "");
    }
    attr.push_str("now");
    attr
}

/// Bit 1 of `range_control` selects full quantization range.
pub fn range_control(value: i32, limited: bool) -> i32 {
    if limited {
        value & 1
    } else {
        value | 2
    }
}

/// Extracts the framebuffer name from a `FRAMEBUFFER` value such as `/dev/fb1`.
pub fn framebuffer_from_env(value: &str) -> Option<String> {
    let start = value.find("fb")?;
    let name = &value[start..];
    (name.len() > 2).then(|| name.to_owned())
}

/// The post-switch settle delay, configured in tenths of a second.
pub fn refresh_change_delay(deciseconds: u16) -> Option<Duration> {
    (deciseconds > 0).then(|| Duration::from_millis(u64::from(deciseconds) * 100))
}

// =============================================================================
// Tests
// =============================================================================
