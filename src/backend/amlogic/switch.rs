//! Writes that reconfigure the display pipeline.

use amlwin_config::VideoScreen;
use anyhow::Context;

use super::helpers::{hdmitx_attr, range_control};
use super::types::{
    framebuffer_attr, DisplayMode, StereoMode, DISPLAY_MODE, FRAC_RATE_POLICY, HDMITX_ATTR,
    HDMITX_CONFIG, HDMITX_DEBUG, OUTPUT_RGB, RANGE_CONTROL,
};
use crate::sysfs::SysfsBridge;

/// Switches the HDMI output to `mode`, then resizes the framebuffer to its GUI size.
pub fn set_native_mode(
    sysfs: &dyn SysfsBridge,
    mode: &DisplayMode,
    framebuffer: &str,
    stereo: StereoMode,
) -> anyhow::Result<()> {
    let _span = tracy_client::span!("set_native_mode");

    anyhow::ensure!(!mode.name.is_empty(), "mode {mode} has no hardware name");
    info!("switching output to {} ({mode})", mode.name);

    if sysfs.exists(FRAC_RATE_POLICY) {
        let policy = i32::from(mode.is_fractional());
        if let Err(err) = sysfs.set_int(FRAC_RATE_POLICY, policy) {
            warn!("error setting the fractional rate policy: {err:?}");
        }
    }

    sysfs
        .set_string(DISPLAY_MODE, &mode.name)
        .context("error setting the display mode")?;

    if let Err(err) = sysfs.set_string(HDMITX_CONFIG, stereo.hdmitx_config()) {
        debug!("error setting the stereo output mode: {err:?}");
    }

    set_framebuffer_resolution(sysfs, mode.width, mode.height, framebuffer)
}

/// Sizes the framebuffer, with a virtual height of two screens for page flipping.
pub fn set_framebuffer_resolution(
    sysfs: &dyn SysfsBridge,
    width: u32,
    height: u32,
    framebuffer: &str,
) -> anyhow::Result<()> {
    let path = framebuffer_attr(framebuffer, "virtual_size");
    sysfs
        .set_string(&path, &format!("{width},{}", height * 2))
        .with_context(|| format!("error resizing {framebuffer} to {width}x{height}"))
}

pub fn set_blank(sysfs: &dyn SysfsBridge, framebuffer: &str, blank: bool) -> anyhow::Result<()> {
    sysfs.set_int(&framebuffer_attr(framebuffer, "blank"), i32::from(blank))
}

/// Turns off the hardware scaler on the OSD framebuffers, the GUI is rendered at output size.
pub fn disable_free_scale(sysfs: &dyn SysfsBridge) {
    for fb in ["fb0", "fb1"] {
        let path = framebuffer_attr(fb, "free_scale");
        if let Err(err) = sysfs.set_int(&path, 0) {
            debug!("error disabling free scale on {fb}: {err:?}");
        }
    }
}

/// Applies the user's HDMI output options.
///
/// Every attribute is optional on some kernels, so failures are logged and skipped.
pub fn apply_output_settings(sysfs: &dyn SysfsBridge, settings: &VideoScreen) {
    let _span = tracy_client::span!("apply_output_settings");

    if settings.force_rgb {
        debug!("forcing RGB output");
        if let Err(err) = sysfs.set_string(OUTPUT_RGB, "1") {
            warn!("error forcing RGB output: {err:?}");
        }
    }

    match sysfs.get_int(RANGE_CONTROL) {
        Ok(value) => {
            let value = range_control(value, settings.limited_range);
            debug!(
                "setting quantization range to {}",
                if value & 2 != 0 { "full" } else { "limited" }
            );
            if let Err(err) = sysfs.set_int(RANGE_CONTROL, value) {
                warn!("error setting quantization range: {err:?}");
            }
        }
        Err(err) => debug!("quantization range control is unavailable: {err:?}"),
    }

    if settings.lock_hpd {
        debug!("locking HPD");
        if let Err(err) = sysfs.set_string(HDMITX_DEBUG, "hpd_lock1") {
            warn!("error locking HPD: {err:?}");
        }
    }

    match sysfs.get_string(HDMITX_ATTR) {
        Ok(attr) => {
            let attr = hdmitx_attr(&attr, settings.force_422);
            debug!("setting HDMI output attributes to {attr:?}");
            if let Err(err) = sysfs.set_string(HDMITX_ATTR, &attr) {
                warn!("error setting HDMI output attributes: {err:?}");
            }
        }
        Err(err) => debug!("HDMI output attributes are unavailable: {err:?}"),
    }
}
