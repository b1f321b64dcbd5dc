//! Output management subsystem for the Amlogic backend.
//!
//! Owns the published resolution table. Slot 0 holds the desktop resolution, slot `1 + i` holds
//! entry `i` of the last probed catalog.

use std::sync::{Arc, Mutex};

use super::types::{DesktopSelection, DisplayMode};

/// Resolutions the rest of the application can address by slot.
#[derive(Debug, Clone, Default)]
pub struct ResolutionTable {
    desktop: Option<DesktopSelection>,
    modes: Vec<DisplayMode>,
}

impl ResolutionTable {
    /// Slot of the desktop resolution.
    pub const DESKTOP: usize = 0;

    pub fn desktop(&self) -> Option<&DesktopSelection> {
        self.desktop.as_ref()
    }

    pub fn get(&self, slot: usize) -> Option<&DisplayMode> {
        match slot {
            Self::DESKTOP => self.desktop.as_ref().map(|sel| &sel.mode),
            slot => self.modes.get(slot - 1),
        }
    }

    /// Number of addressable slots, the desktop slot included. Zero until the first publish
    /// that yields anything.
    pub fn len(&self) -> usize {
        if self.desktop.is_none() && self.modes.is_empty() {
            0
        } else {
            1 + self.modes.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn modes(&self) -> &[DisplayMode] {
        &self.modes
    }

    /// Stores a freshly probed catalog and the desktop selection made from it.
    ///
    /// The table grows to fit the catalog but never shrinks. Without a selection the previous
    /// desktop resolution stays; on first run it is seeded from the active mode instead.
    pub fn publish(
        &mut self,
        catalog: &[DisplayMode],
        selection: Option<DesktopSelection>,
        current: Option<&DisplayMode>,
    ) {
        for (idx, mode) in catalog.iter().enumerate() {
            debug!(
                "found resolution {}x{} with {mode}",
                mode.width, mode.height
            );

            if let Some(slot) = self.modes.get_mut(idx) {
                *slot = mode.clone();
            } else {
                self.modes.push(mode.clone());
            }
        }

        match selection {
            Some(selection) => {
                info!(
                    "found best resolution {} at {:?}, setting it as the desktop resolution",
                    selection.identifier, selection.index
                );
                self.desktop = Some(selection);
            }
            None => match (&self.desktop, current) {
                (None, Some(current)) => {
                    info!("seeding the desktop resolution from the active mode {current}");
                    self.desktop = Some(DesktopSelection {
                        identifier: current.identifier(),
                        mode: current.clone(),
                        index: None,
                        exact: false,
                    });
                }
                (Some(desktop), _) => {
                    warn!(
                        "no usable resolution found, keeping {}",
                        desktop.identifier
                    );
                }
                (None, None) => warn!("no usable resolution found"),
            },
        }
    }
}

/// Output management subsystem.
///
/// OWNS:
/// - Resolution table shared with renderers and settings UI
pub struct OutputManager {
    /// Resolution table shared with external queries.
    resolutions: Arc<Mutex<ResolutionTable>>,
}

impl OutputManager {
    /// Create a new OutputManager.
    pub fn new() -> Self {
        Self {
            resolutions: Arc::new(Mutex::new(ResolutionTable::default())),
        }
    }

    /// Get a clone of the shared resolution table.
    pub fn resolutions(&self) -> Arc<Mutex<ResolutionTable>> {
        Arc::clone(&self.resolutions)
    }

    /// Get a copy of the current desktop selection.
    pub fn desktop(&self) -> Option<DesktopSelection> {
        let guard = self.resolutions.lock().unwrap();
        guard.desktop().cloned()
    }

    /// Publish a new catalog and desktop selection.
    pub fn publish(
        &self,
        catalog: &[DisplayMode],
        selection: Option<DesktopSelection>,
        current: Option<&DisplayMode>,
    ) {
        let mut guard = self.resolutions.lock().unwrap();
        guard.publish(catalog, selection, current);
    }
}

impl Default for OutputManager {
    fn default() -> Self {
        Self::new()
    }
}
