//! Atomically published parameter snapshots.
//!
//! The control thread builds a new immutable [`TransformParameters`] and
//! swaps it into a `basedrop::SharedCell`. The processing thread loads the
//! latest snapshot without locking. Retired snapshots are freed by a
//! background collector thread, so dropping the last reference on the
//! processing thread only enqueues a pointer.

use crate::error::SessionError;
use crate::params::TransformParameters;
use basedrop::{Collector, Handle, Shared, SharedCell};
use parking_lot::Mutex;
use std::thread;
use std::time::Duration;

/// Global handle for creating Shared<T> allocations, set on first use
static GC_HANDLE: Mutex<Option<Handle>> = Mutex::new(None);

/// How often the collector thread reclaims retired snapshots
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Get a handle to the process-wide collector, spawning its thread on first use.
pub fn collector_handle() -> Result<Handle, SessionError> {
    let mut guard = GC_HANDLE.lock();
    if let Some(handle) = guard.as_ref() {
        return Ok(handle.clone());
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("vox-gc".to_string())
        .spawn(move || {
            // Collector is created on the thread that runs it
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            tracing::debug!("Snapshot collector thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .map_err(|source| SessionError::ThreadSpawn { name: "vox-gc", source })?;

    let handle = rx.recv().map_err(|_| SessionError::ThreadSpawn {
        name: "vox-gc",
        source: std::io::Error::new(std::io::ErrorKind::Other, "collector exited during startup"),
    })?;
    *guard = Some(handle.clone());
    Ok(handle)
}

/// Single-writer, single-reader cell holding the current parameter snapshot
pub struct ParameterCell {
    handle: Handle,
    cell: SharedCell<TransformParameters>,
}

impl ParameterCell {
    pub fn new(handle: Handle, initial: TransformParameters) -> Self {
        let cell = SharedCell::new(Shared::new(&handle, initial));
        Self { handle, cell }
    }

    /// Latest published snapshot (wait-free for the reader)
    #[inline]
    pub fn load(&self) -> Shared<TransformParameters> {
        self.cell.get()
    }

    /// Current parameters by value
    pub fn get(&self) -> TransformParameters {
        *self.cell.get()
    }

    /// Publish a new snapshot, replacing the previous one
    pub fn store(&self, params: TransformParameters) {
        self.cell.set(Shared::new(&self.handle, params));
    }
}
