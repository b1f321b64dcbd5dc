//! HDMI hotplug monitoring.
//!
//! The HDMI transmitter driver reports plug events through the `switch` udev subsystem. A
//! background thread waits for them and compares the display's EDID against the last one seen;
//! when a different display shows up it posts [`DisplayMessage::Resync`] to the main thread. The
//! thread never touches window system state directly.

use std::io;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;

use super::types::{DisplayMessage, HPD_STATE, RAW_EDID};
use crate::sysfs::SysfsBridge;

/// Upper bound on how long the monitor takes to notice it was asked to stop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// udev subsystem the HDMI transmitter reports plug events on.
pub const HOTPLUG_SUBSYSTEM: &str = "switch";

// =============================================================================
// Message Channel
// =============================================================================

/// Where resync requests go. Delivery is asynchronous and fire-and-forget.
pub trait ResyncSink: Send + 'static {
    fn post(&self, msg: DisplayMessage);
}

impl ResyncSink for calloop::channel::Sender<DisplayMessage> {
    fn post(&self, msg: DisplayMessage) {
        if self.send(msg).is_err() {
            warn!("error posting {msg:?}: the main loop is gone");
        }
    }
}

impl ResyncSink for mpsc::Sender<DisplayMessage> {
    fn post(&self, msg: DisplayMessage) {
        if self.send(msg).is_err() {
            warn!("error posting {msg:?}: the receiver is gone");
        }
    }
}

// =============================================================================
// Event Sources
// =============================================================================

/// A stream of kernel hotplug notifications.
pub trait HotplugSource {
    /// Waits up to `timeout` for notifications, returning whether any arrived.
    fn wait_event(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// udev netlink monitor filtered to one subsystem.
pub struct UdevSource {
    socket: udev::MonitorSocket,
}

impl UdevSource {
    pub fn open(subsystem: &str) -> io::Result<Self> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem(subsystem)?
            .listen()?;
        Ok(Self { socket })
    }
}

impl HotplugSource for UdevSource {
    fn wait_event(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: pollfd is a valid, exclusively borrowed array of length 1.
        let ret = unsafe { libc::poll(&mut pollfd, 1, timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        if ret == 0 {
            return Ok(false);
        }
        if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::other(format!(
                "hotplug socket reported poll error (revents {:#x})",
                pollfd.revents
            )));
        }

        let mut received = false;
        for event in self.socket.iter() {
            trace!(
                "udev event {:?} on {:?}",
                event.event_type(),
                event.syspath()
            );
            received = true;
        }

        if !received {
            error!("hotplug socket was readable but no device was received");
        }

        Ok(received)
    }
}

// =============================================================================
// Change Detection
// =============================================================================

/// Decides whether a hotplug event means a different display is attached.
pub struct HotplugWatcher<S> {
    sysfs: Arc<dyn SysfsBridge>,
    sink: S,
    last_edid: String,
}

impl<S: ResyncSink> HotplugWatcher<S> {
    pub fn new(sysfs: Arc<dyn SysfsBridge>, sink: S, last_edid: String) -> Self {
        Self {
            sysfs,
            sink,
            last_edid,
        }
    }

    pub fn last_edid(&self) -> &str {
        &self.last_edid
    }

    /// Handles one hotplug event, returning whether a resync was requested.
    pub fn on_event(&mut self) -> bool {
        debug!("detected HDMI switch event");

        let hpd = self.sysfs.get_int(HPD_STATE).unwrap_or_else(|err| {
            debug!("error reading HPD state, assuming disconnected: {err:?}");
            0
        });

        let edid = self.sysfs.get_string(RAW_EDID).unwrap_or_else(|err| {
            debug!("error reading EDID: {err:?}");
            String::new()
        });

        if hpd == 0 || edid == self.last_edid {
            return false;
        }

        info!("attached display changed, requesting a resync");
        self.sink.post(DisplayMessage::Resync);
        self.last_edid = edid;
        true
    }
}

// =============================================================================
// Monitor Thread
// =============================================================================

/// Owns the background hotplug thread.
///
/// `start` and `stop` must not be called concurrently; the window system serializes them.
pub struct HotplugMonitor {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugMonitor {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Spawns the monitor thread.
    ///
    /// The event source is opened on the monitor thread. If that fails the thread logs it and
    /// exits, leaving hotplug detection disabled.
    pub fn start<F, Src, S>(
        &mut self,
        open_source: F,
        sysfs: Arc<dyn SysfsBridge>,
        sink: S,
        last_edid: String,
    ) -> anyhow::Result<()>
    where
        F: FnOnce() -> io::Result<Src> + Send + 'static,
        Src: HotplugSource,
        S: ResyncSink,
    {
        // A thread that exited on its own leaves its handle behind.
        if self.thread.as_ref().is_some_and(JoinHandle::is_finished) {
            self.stop();
        }

        if self.thread.is_some() {
            warn!("hotplug monitor is already running");
            return Ok(());
        }

        debug!("starting the HDMI hotplug event monitor");

        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let watcher = HotplugWatcher::new(sysfs, sink, last_edid);

        let thread = thread::Builder::new()
            .name("hotplug".to_owned())
            .spawn(move || run(running, open_source, watcher));

        match thread {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(err).context("error spawning the hotplug monitor thread")
            }
        }
    }

    /// Stops the monitor thread and waits for it to exit.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        debug!("stopping the HDMI hotplug event monitor");

        self.running.store(false, Ordering::Release);
        if thread.join().is_err() {
            error!("hotplug monitor thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F, Src, S>(running: Arc<AtomicBool>, open_source: F, mut watcher: HotplugWatcher<S>)
where
    F: FnOnce() -> io::Result<Src>,
    Src: HotplugSource,
    S: ResyncSink,
{
    let mut source = match open_source() {
        Ok(source) => source,
        Err(err) => {
            warn!("error opening the hotplug event source, hotplug detection is disabled: {err:?}");
            return;
        }
    };

    while running.load(Ordering::Acquire) {
        let started = Instant::now();
        match source.wait_event(POLL_INTERVAL) {
            Ok(true) => {
                watcher.on_event();
            }
            Ok(false) => {
                // Wakeups without an event still wait out the interval.
                if let Some(rest) = POLL_INTERVAL.checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
            }
            Err(err) => {
                warn!("error waiting for hotplug events, stopping the monitor: {err:?}");
                return;
            }
        }
    }
}
