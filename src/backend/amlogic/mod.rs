//! Amlogic framebuffer backend.
//!
//! This module uses the **subsystem ownership pattern**:
//! - `SysfsCatalog` (catalog.rs) - reads the modes the attached display supports
//! - `OutputManager` (outputs.rs) - owns the published resolution table
//! - `DisplayResourceRegistry` (resources.rs) - owns display-dependent resources
//! - `HotplugMonitor` (hotplug.rs) - owns the background udev thread
//!
//! `Amlogic` is a thin coordinator that:
//! - Holds the native window and the settings source
//! - Sequences mode switches around resource notifications
//! - Provides public API delegation

mod catalog;
mod helpers;
mod hotplug;
mod outputs;
mod resources;
mod switch;
mod types;

use std::cell::RefCell;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use amlwin_config::Config;

pub use catalog::{fractional_variant, parse_mode_name, ModeCatalog, SysfsCatalog};
pub use helpers::{
    framebuffer_from_env, hdmitx_attr, range_control, refresh_change_delay, select_desktop_mode,
    DesiredMode,
};
pub use hotplug::{
    HotplugMonitor, HotplugSource, HotplugWatcher, ResyncSink, UdevSource, HOTPLUG_SUBSYSTEM,
    POLL_INTERVAL,
};
pub use outputs::{OutputManager, ResolutionTable};
pub use resources::{DisplayResource, DisplayResourceRegistry};
pub use switch::{
    apply_output_settings, disable_free_scale, set_blank, set_framebuffer_resolution,
    set_native_mode,
};
pub use types::{
    DesktopSelection, DisplayMessage, DisplayMode, ModeFlags, ModeIdentifier, NativeWindow,
    RankKey, StereoMode, WindowRequest,
};
use types::RAW_EDID;

use crate::sysfs::{Sysfs, SysfsBridge};

/// Hardware handles shared by the backend.
#[derive(Clone)]
pub struct AmlContext {
    pub sysfs: Arc<dyn SysfsBridge>,
    /// Framebuffer device name, such as `fb0`.
    pub framebuffer: String,
}

impl AmlContext {
    pub fn new(sysfs: Arc<dyn SysfsBridge>, framebuffer: impl Into<String>) -> Self {
        Self {
            sysfs,
            framebuffer: framebuffer.into(),
        }
    }

    /// Builds the context from the debug config, with `$FRAMEBUFFER` taking precedence.
    pub fn from_config(config: &Config) -> Self {
        let root = PathBuf::from(config.debug.sysfs_root());
        let framebuffer = std::env::var("FRAMEBUFFER")
            .ok()
            .and_then(|value| framebuffer_from_env(&value))
            .unwrap_or_else(|| config.debug.framebuffer().to_owned());

        debug!("using framebuffer {framebuffer} with sysfs at {root:?}");
        Self::new(Arc::new(Sysfs::new(root)), framebuffer)
    }
}

/// Where the backend announces the video codecs and renderers it provides.
pub trait CapabilityRegistry {
    fn register_video_codec(&mut self, name: &str);
    fn register_renderer(&mut self, name: &str);
}

pub struct Amlogic {
    config: Rc<RefCell<Config>>,
    context: AmlContext,
    catalog: Box<dyn ModeCatalog>,
    // Resource management subsystem - shared with the threads that own resources.
    resources: Arc<DisplayResourceRegistry>,
    // Output management subsystem - owns the resolution table.
    outputs: OutputManager,
    // Hotplug subsystem - owns the monitor thread.
    monitor: HotplugMonitor,
    window: Option<NativeWindow>,
    fullscreen: bool,
    stereo: StereoMode,
    /// When set, resources are told the display is back once this passes.
    reset_deadline: Option<Instant>,
}

impl Amlogic {
    /// Brings up the backend, watching for hotplug events through udev.
    pub fn new(
        config: Rc<RefCell<Config>>,
        context: AmlContext,
        sink: impl ResyncSink,
    ) -> anyhow::Result<Self> {
        Self::with_hotplug_source(config, context, sink, || {
            UdevSource::open(HOTPLUG_SUBSYSTEM)
        })
    }

    pub fn with_hotplug_source<F, Src>(
        config: Rc<RefCell<Config>>,
        context: AmlContext,
        sink: impl ResyncSink,
        open_source: F,
    ) -> anyhow::Result<Self>
    where
        F: FnOnce() -> io::Result<Src> + Send + 'static,
        Src: HotplugSource,
    {
        let _span = tracy_client::span!("Amlogic::new");

        let sysfs = context.sysfs.clone();

        disable_free_scale(&*sysfs);
        apply_output_settings(&*sysfs, &config.borrow().video_screen);

        let last_edid = sysfs.get_string(RAW_EDID).unwrap_or_else(|err| {
            debug!("error reading the initial EDID: {err:?}");
            String::new()
        });

        let mut monitor = HotplugMonitor::new();
        monitor.start(open_source, sysfs.clone(), sink, last_edid)?;

        Ok(Self {
            config,
            catalog: Box::new(SysfsCatalog::new(sysfs)),
            context,
            resources: Arc::new(DisplayResourceRegistry::new()),
            outputs: OutputManager::new(),
            monitor,
            window: None,
            fullscreen: false,
            stereo: StereoMode::Off,
            reset_deadline: None,
        })
    }

    /// Announces what this backend provides and sizes the framebuffer for the GUI.
    pub fn init(&mut self, caps: &mut dyn CapabilityRegistry) -> anyhow::Result<()> {
        caps.register_video_codec("amlogic");
        caps.register_renderer("gles");
        caps.register_renderer("aml");

        set_framebuffer_resolution(&*self.context.sysfs, 1920, 1080, &self.context.framebuffer)
    }

    /// Realizes a window in the requested mode, switching the output if needed.
    pub fn create_window(&mut self, request: &WindowRequest) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Amlogic::create_window");

        if self.window.is_some()
            && self.fullscreen == request.fullscreen
            && self.stereo == request.stereo
        {
            if let Some(current) = self.catalog.current_mode() {
                if current.same_output(&request.mode) {
                    debug!("no need to create a new window");
                    return Ok(());
                }
            }
        }

        let delay = refresh_change_delay(self.config.borrow().video_screen.delay_refresh_change);
        if let Some(delay) = delay {
            debug!("delaying the display reset by {delay:?}");
            self.reset_deadline = Some(Instant::now() + delay);
        }

        self.resources.notify_lost();

        self.stereo = request.stereo;
        self.fullscreen = request.fullscreen;
        self.window = Some(NativeWindow {
            width: request.mode.width,
            height: request.mode.height,
        });

        let res = set_native_mode(
            &*self.context.sysfs,
            &request.mode,
            &self.context.framebuffer,
            request.stereo,
        );

        if let Err(err) = res {
            // Resources must not stay in the lost state.
            self.reset_deadline = None;
            self.resources.notify_reset();
            return Err(err);
        }

        if self.reset_deadline.is_none() {
            self.resources.notify_reset();
        }

        Ok(())
    }

    pub fn destroy_window(&mut self) {
        if self.window.take().is_some() {
            debug!("destroyed the native window");
        }
    }

    pub fn window(&self) -> Option<NativeWindow> {
        self.window
    }

    /// Probes the display and picks the desktop resolution from what it supports.
    pub fn update_resolutions(&mut self) {
        let _span = tracy_client::span!("Amlogic::update_resolutions");

        let catalog = self.catalog.probe();
        let current = self.catalog.current_mode();

        let config = self.config.borrow();
        let setting = config.video_screen.screen_mode();
        let selection = select_desktop_mode(&catalog, setting, current.as_ref());

        self.outputs.publish(&catalog, selection, current.as_ref());
    }

    /// Handles [`DisplayMessage::Resync`]: re-probes and returns to the desktop resolution.
    pub fn on_resync(&mut self) -> anyhow::Result<()> {
        info!("resyncing display resolutions");
        self.update_resolutions();

        let Some(desktop) = self.outputs.desktop() else {
            warn!("no desktop resolution after resync");
            return Ok(());
        };

        let request = WindowRequest {
            mode: desktop.mode,
            fullscreen: true,
            stereo: self.stereo,
        };
        self.create_window(&request)
    }

    pub fn on_message(&mut self, message: DisplayMessage) {
        match message {
            DisplayMessage::Resync => {
                if let Err(err) = self.on_resync() {
                    warn!("error resyncing the display: {err:?}");
                }
            }
        }
    }

    pub fn show(&self, show: bool) -> bool {
        match set_blank(&*self.context.sysfs, &self.context.framebuffer, !show) {
            Ok(()) => true,
            Err(err) => {
                warn!("error setting framebuffer blanking: {err:?}");
                false
            }
        }
    }

    /// Hiding the output is not supported.
    pub fn hide(&self) -> bool {
        false
    }

    pub fn register(&self, resource: Arc<dyn DisplayResource>) {
        self.resources.register(resource);
    }

    pub fn unregister(&self, resource: &Arc<dyn DisplayResource>) {
        self.resources.unregister(resource);
    }

    /// The registry, for resources living on other threads.
    pub fn resources(&self) -> Arc<DisplayResourceRegistry> {
        self.resources.clone()
    }

    pub fn pending_reset_deadline(&self) -> Option<Instant> {
        self.reset_deadline
    }

    /// Tells resources the display is back if the settle delay has passed.
    ///
    /// Returns whether the reset was dispatched.
    pub fn dispatch_pending_reset(&mut self, now: Instant) -> bool {
        match self.reset_deadline {
            Some(deadline) if deadline <= now => {
                self.reset_deadline = None;
                self.resources.notify_reset();
                true
            }
            _ => false,
        }
    }

    pub fn reload_config(&mut self, config: Config) {
        let _span = tracy_client::span!("Amlogic::reload_config");

        apply_output_settings(&*self.context.sysfs, &config.video_screen);
        *self.config.borrow_mut() = config;
        self.update_resolutions();
    }

    pub fn desktop(&self) -> Option<DesktopSelection> {
        self.outputs.desktop()
    }

    pub fn resolutions(&self) -> Arc<Mutex<ResolutionTable>> {
        self.outputs.resolutions()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }
}

impl Drop for Amlogic {
    fn drop(&mut self) {
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use amlwin_config::VideoScreen;

    use super::resources::tests::Recorder;
    use super::types::{DISPLAY_MODE, DISP_CAP, HDMITX_CONFIG};
    use super::*;
    use crate::sysfs::MemorySysfs;

    /// Hotplug source that never reports anything.
    struct Idle;

    impl HotplugSource for Idle {
        fn wait_event(&mut self, timeout: Duration) -> io::Result<bool> {
            std::thread::sleep(timeout);
            Ok(false)
        }
    }

    const CAPS: &str = "480p60hz\n720p60hz\n1080i50hz\n1080p50hz\n1080p60hz*\n";

    struct Fixture {
        sysfs: Arc<MemorySysfs>,
        amlogic: Amlogic,
        _rx: mpsc::Receiver<DisplayMessage>,
    }

    fn fixture(video_screen: VideoScreen) -> Fixture {
        let sysfs = Arc::new(
            MemorySysfs::new()
                .with(DISP_CAP, CAPS)
                .with(DISPLAY_MODE, "1080p60hz")
                .with(RAW_EDID, "00ffffffffffff00"),
        );
        let config = Config {
            video_screen,
            ..Config::default()
        };
        let (tx, rx) = mpsc::channel();
        let amlogic = Amlogic::with_hotplug_source(
            Rc::new(RefCell::new(config)),
            AmlContext::new(sysfs.clone(), "fb0"),
            tx,
            || Ok(Idle),
        )
        .unwrap();

        Fixture {
            sysfs,
            amlogic,
            _rx: rx,
        }
    }

    fn request(name: &str) -> WindowRequest {
        WindowRequest {
            mode: parse_mode_name(name).unwrap(),
            fullscreen: true,
            stereo: StereoMode::Off,
        }
    }

    #[derive(Default)]
    struct Caps(Vec<String>);

    impl CapabilityRegistry for Caps {
        fn register_video_codec(&mut self, name: &str) {
            self.0.push(format!("codec {name}"));
        }

        fn register_renderer(&mut self, name: &str) {
            self.0.push(format!("renderer {name}"));
        }
    }

    #[test]
    fn new_applies_output_settings_and_monitors() {
        let f = fixture(VideoScreen {
            force_rgb: true,
            ..VideoScreen::default()
        });

        assert_eq!(
            f.sysfs.writes_to("/sys/class/graphics/fb1/free_scale"),
            ["0"]
        );
        assert_eq!(f.sysfs.writes_to(types::OUTPUT_RGB), ["1"]);
        assert!(f.amlogic.is_monitoring());
    }

    #[test]
    fn init_registers_capabilities() {
        let mut f = fixture(VideoScreen::default());
        let mut caps = Caps::default();
        f.amlogic.init(&mut caps).unwrap();

        assert_eq!(
            caps.0,
            ["codec amlogic", "renderer gles", "renderer aml"]
        );
        assert_eq!(
            f.sysfs.get("/sys/class/graphics/fb0/virtual_size").as_deref(),
            Some("1920,2160")
        );
    }

    #[test]
    fn update_resolutions_selects_desktop() {
        let mut f = fixture(VideoScreen::default());
        f.amlogic.update_resolutions();

        let desktop = f.amlogic.desktop().unwrap();
        assert_eq!(desktop.identifier.as_str(), "0192001080060.00000pstd");
        assert_eq!(desktop.index, Some(4));
        assert!(desktop.exact);
        assert_eq!(f.amlogic.resolutions().lock().unwrap().len(), 6);
    }

    #[test]
    fn create_window_notifies_around_switch() {
        let mut f = fixture(VideoScreen::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        f.amlogic.register(Recorder::new("gles", &log));

        f.amlogic.create_window(&request("720p60hz")).unwrap();

        assert_eq!(*log.lock().unwrap(), ["gles: lost", "gles: reset"]);
        assert_eq!(f.sysfs.writes_to(DISPLAY_MODE), ["720p60hz"]);
        assert_eq!(
            f.amlogic.window(),
            Some(NativeWindow {
                width: 1280,
                height: 720
            })
        );
        assert_eq!(f.amlogic.pending_reset_deadline(), None);
    }

    #[test]
    fn create_window_is_idempotent() {
        let mut f = fixture(VideoScreen::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        f.amlogic.register(Recorder::new("gles", &log));

        f.amlogic.create_window(&request("1080p60hz")).unwrap();
        f.amlogic.create_window(&request("1080p60hz")).unwrap();

        assert_eq!(*log.lock().unwrap(), ["gles: lost", "gles: reset"]);
        assert_eq!(f.sysfs.writes_to(DISPLAY_MODE), ["1080p60hz"]);

        // A stereo change needs a new window even in the same mode.
        let mut stereo = request("1080p60hz");
        stereo.stereo = StereoMode::TopAndBottom;
        f.amlogic.create_window(&stereo).unwrap();
        assert_eq!(f.sysfs.writes_to(HDMITX_CONFIG), ["3doff", "3dtb"]);
    }

    #[test]
    fn delayed_reset() {
        let mut f = fixture(VideoScreen {
            delay_refresh_change: 5,
            ..VideoScreen::default()
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        f.amlogic.register(Recorder::new("video", &log));

        let before = Instant::now();
        f.amlogic.create_window(&request("1080p50hz")).unwrap();
        assert_eq!(*log.lock().unwrap(), ["video: lost"]);

        let deadline = f.amlogic.pending_reset_deadline().unwrap();
        assert!(deadline >= before + Duration::from_millis(500));

        assert!(!f.amlogic.dispatch_pending_reset(before));
        assert_eq!(*log.lock().unwrap(), ["video: lost"]);

        assert!(f.amlogic.dispatch_pending_reset(deadline));
        assert_eq!(*log.lock().unwrap(), ["video: lost", "video: reset"]);
        assert_eq!(f.amlogic.pending_reset_deadline(), None);

        // Only once.
        assert!(!f.amlogic.dispatch_pending_reset(deadline));
    }

    #[test]
    fn failed_switch_still_resets() {
        let mut f = fixture(VideoScreen::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        f.amlogic.register(Recorder::new("gles", &log));

        let mut req = request("720p60hz");
        req.mode.name.clear();
        assert!(f.amlogic.create_window(&req).is_err());
        assert_eq!(*log.lock().unwrap(), ["gles: lost", "gles: reset"]);
    }

    #[test]
    fn resync_switches_to_desktop() {
        let mut f = fixture(VideoScreen {
            screen_mode: amlwin_config::ScreenMode("0128000720060.00000pstd".to_owned()),
            ..VideoScreen::default()
        });

        f.amlogic.on_message(DisplayMessage::Resync);

        assert_eq!(f.sysfs.writes_to(DISPLAY_MODE), ["720p60hz"]);
        assert_eq!(f.amlogic.desktop().unwrap().mode.name, "720p60hz");
    }

    #[test]
    fn reload_config_reapplies_settings() {
        let mut f = fixture(VideoScreen::default());
        assert!(f.sysfs.writes_to(types::HDMITX_DEBUG).is_empty());

        let config = Config {
            video_screen: VideoScreen {
                lock_hpd: true,
                screen_mode: amlwin_config::ScreenMode("0072000480060.00000pstd".to_owned()),
                ..VideoScreen::default()
            },
            ..Config::default()
        };
        f.amlogic.reload_config(config);

        assert_eq!(f.sysfs.writes_to(types::HDMITX_DEBUG), ["hpd_lock1"]);
        assert_eq!(f.amlogic.desktop().unwrap().mode.name, "480p60hz");
    }

    #[test]
    fn show_blanks_framebuffer() {
        let f = fixture(VideoScreen::default());

        assert!(f.amlogic.show(false));
        assert!(f.amlogic.show(true));
        assert!(!f.amlogic.hide());

        assert_eq!(
            f.sysfs.writes_to("/sys/class/graphics/fb0/blank"),
            ["1", "0"]
        );
    }

    #[test]
    fn destroy_window_is_idempotent() {
        let mut f = fixture(VideoScreen::default());
        f.amlogic.create_window(&request("720p60hz")).unwrap();

        f.amlogic.destroy_window();
        f.amlogic.destroy_window();
        assert_eq!(f.amlogic.window(), None);
    }

    #[test]
    fn drop_stops_monitor() {
        let f = fixture(VideoScreen::default());
        let start = Instant::now();
        drop(f);
        assert!(start.elapsed() < POLL_INTERVAL * 4);
    }
}
