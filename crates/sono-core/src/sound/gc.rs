//! Deferred deallocation for sample buffers
//!
//! Sound-effect buffers are dropped by the mixer thread when an effect
//! finishes or its bank entry expires. Freeing a large buffer there can
//! stall a quantum, so buffers live in `basedrop::Shared` pointers: dropping
//! one on the mixer thread only enqueues it, and a background collector
//! thread does the actual deallocation.

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

static COLLECTOR_HANDLE: OnceLock<Handle> = OnceLock::new();

const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

fn spawn_collector() -> Handle {
    let (tx, rx) = mpsc::channel();

    // The Collector itself must live on the thread that collects
    thread::Builder::new()
        .name("sono-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("send collector handle");
            log::info!("sound buffer collector thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("spawn sound collector thread");

    rx.recv().expect("receive collector handle")
}

/// Handle for allocating `Shared` sample buffers. Cheap to clone; the
/// collector thread starts lazily on first use.
pub fn collector_handle() -> Handle {
    COLLECTOR_HANDLE.get_or_init(spawn_collector).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    #[test]
    fn test_shared_roundtrip() {
        let handle = collector_handle();
        let buffer = Shared::new(&handle, vec![0.5f32; 1024]);
        let clone = buffer.clone();
        assert_eq!(clone[0], 0.5);
        drop(buffer);
        assert_eq!(clone.len(), 1024);
    }
}
