//! Registry of display-dependent resources.
//!
//! Renderers and video outputs that hold GPU or display state register here to be told when the
//! output is about to go away for a mode switch and when it is usable again.

use std::sync::{Arc, Mutex};

/// Something that must react to display mode switches.
///
/// Callbacks are invoked on the thread that performs the switch. They must not fail.
pub trait DisplayResource: Send + Sync {
    /// The display is about to be reconfigured.
    fn on_lost_display(&self);

    /// The display is configured and stable again.
    fn on_reset_display(&self);
}

#[derive(Default)]
pub struct DisplayResourceRegistry {
    resources: Mutex<Vec<Arc<dyn DisplayResource>>>,
}

impl DisplayResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: Arc<dyn DisplayResource>) {
        self.resources.lock().unwrap().push(resource);
    }

    /// Removes a resource by identity. Unknown resources are ignored.
    pub fn unregister(&self, resource: &Arc<dyn DisplayResource>) {
        let mut resources = self.resources.lock().unwrap();
        if let Some(idx) = resources.iter().position(|r| same_resource(r, resource)) {
            resources.remove(idx);
        }
    }

    pub fn len(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_lost(&self) {
        let _span = tracy_client::span!("DisplayResourceRegistry::notify_lost");
        for resource in self.snapshot() {
            resource.on_lost_display();
        }
    }

    pub fn notify_reset(&self) {
        let _span = tracy_client::span!("DisplayResourceRegistry::notify_reset");
        for resource in self.snapshot() {
            resource.on_reset_display();
        }
    }

    // Callbacks run without the lock held so that a resource can unregister itself.
    fn snapshot(&self) -> Vec<Arc<dyn DisplayResource>> {
        self.resources.lock().unwrap().clone()
    }
}

fn same_resource(a: &Arc<dyn DisplayResource>, b: &Arc<dyn DisplayResource>) -> bool {
    // Compare data pointers only, vtable pointers of the same type may differ across codegen
    // units.
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
