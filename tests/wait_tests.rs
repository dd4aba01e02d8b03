use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sysgpio::{
    AttrHandle, GpioError, OpenMode, PinController, StopSignal, SysfsAccess, SysfsConfig,
    Wakeup,
};

/// Value attribute that always reports an edge and starts failing reads after
/// `reads_before_failure` successful ones, like a node removed under the waiter.
#[derive(Default)]
struct FailingReads {
    reads_before_failure: usize,
    reads: Arc<AtomicUsize>,
    waits: Arc<AtomicUsize>,
}

struct FailingHandle {
    reads_before_failure: usize,
    reads: Arc<AtomicUsize>,
    waits: Arc<AtomicUsize>,
}

impl SysfsAccess for FailingReads {
    type Handle = FailingHandle;

    fn open(&self, _path: &Path, _mode: OpenMode) -> io::Result<FailingHandle> {
        Ok(FailingHandle {
            reads_before_failure: self.reads_before_failure,
            reads: self.reads.clone(),
            waits: self.waits.clone(),
        })
    }
}

impl AttrHandle for FailingHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let done = self.reads.fetch_add(1, Ordering::SeqCst);
        if done >= self.reads_before_failure {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        buf[0] = b'0';
        Ok(1)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn wait_exceptional(&mut self, _stop: &StopSignal) -> io::Result<Wakeup> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        Ok(Wakeup::Edge)
    }
}

fn controller(access: FailingReads) -> PinController<FailingReads> {
    PinController::new(Arc::new(SysfsConfig::default()), Arc::new(access))
}

#[test]
fn failed_initial_read_is_not_an_edge() {
    let access = FailingReads::default();
    let waits = access.waits.clone();
    let gpio = controller(access);

    let stop = StopSignal::new().unwrap();
    let err = gpio.wait_for_edge_until(45, &stop).unwrap_err();
    assert!(matches!(err, GpioError::ReadFailed { .. }), "{err}");
    assert_eq!(waits.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_drain_read_is_not_an_edge() {
    let access = FailingReads {
        reads_before_failure: 1,
        ..FailingReads::default()
    };
    let reads = access.reads.clone();
    let waits = access.waits.clone();
    let gpio = controller(access);

    let err = gpio.wait_for_edge(45).unwrap_err();
    assert!(matches!(err, GpioError::ReadFailed { .. }), "{err}");
    assert_eq!(reads.load(Ordering::SeqCst), 2);
    assert_eq!(waits.load(Ordering::SeqCst), 1);
}
