// Deferred destruction stack
//
// Every raw GPU object registers a destructor here right after creation.
// `flush` runs them newest-first, so teardown mirrors construction order
// without each owner hand-ordering its own Drop.

type Destructor = Box<dyn FnOnce()>;

#[derive(Default)]
pub struct DeletionQueue {
    entries: Vec<(String, Destructor)>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `destroy` to run at the next flush
    pub fn push(&mut self, label: impl Into<String>, destroy: impl FnOnce() + 'static) {
        let label = label.into();
        log::trace!("Deferred destruction of {}", label);
        self.entries.push((label, Box::new(destroy)));
    }

    /// Run every registered destructor in reverse registration order.
    ///
    /// The caller must have idled the device.
    pub fn flush(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        log::debug!("Flushing {} deferred destructions", self.entries.len());
        while let Some((label, destroy)) = self.entries.pop() {
            log::trace!("Destroying {}", label);
            destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::warn!(
                "DeletionQueue dropped with {} pending entries, flushing",
                self.entries.len()
            );
            self.flush();
        }
    }
}
