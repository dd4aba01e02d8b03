use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::config::SysfsConfig;
use crate::error::{GpioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeMode {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl EdgeMode {
    /// Both flags win over either one alone; neither flag leaves the edge untouched.
    pub fn from_flags(rising: bool, falling: bool) -> Self {
        match (rising, falling) {
            (true, true) => EdgeMode::Both,
            (true, false) => EdgeMode::Rising,
            (false, true) => EdgeMode::Falling,
            (false, false) => EdgeMode::None,
        }
    }

    /// The literal written to the `edge` attribute, if any.
    pub fn literal(&self) -> Option<&'static str> {
        match self {
            EdgeMode::None => None,
            EdgeMode::Rising => Some("rising"),
            EdgeMode::Falling => Some("falling"),
            EdgeMode::Both => Some("both"),
        }
    }

    pub fn matches(&self, from: PinValue, to: PinValue) -> bool {
        match (self, from, to) {
            (EdgeMode::Rising | EdgeMode::Both, PinValue::Low, PinValue::High) => true,
            (EdgeMode::Falling | EdgeMode::Both, PinValue::High, PinValue::Low) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinValue {
    Low,
    High,
}

impl PinValue {
    pub fn as_u8(&self) -> u8 {
        match self {
            PinValue::Low => 0,
            PinValue::High => 1,
        }
    }

    pub fn as_ascii(&self) -> u8 {
        b'0' + self.as_u8()
    }

    pub fn from_ascii(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(PinValue::Low),
            b'1' => Some(PinValue::High),
            _ => None,
        }
    }
}

impl From<bool> for PinValue {
    fn from(high: bool) -> Self {
        if high { PinValue::High } else { PinValue::Low }
    }
}

impl TryFrom<u8> for PinValue {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(PinValue::Low),
            1 => Ok(PinValue::High),
            other => Err(other),
        }
    }
}

impl fmt::Display for PinValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Per-pin attribute files living under `gpio<N>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Direction,
    Edge,
    Value,
}

impl Attribute {
    pub fn file_name(&self) -> &'static str {
        match self {
            Attribute::Direction => "direction",
            Attribute::Edge => "edge",
            Attribute::Value => "value",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "direction" => Some(Attribute::Direction),
            "edge" => Some(Attribute::Edge),
            "value" => Some(Attribute::Value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn readable(&self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, OpenMode::WriteOnly | OpenMode::ReadWrite)
    }
}

/// Outcome of a blocking edge wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Edge,
    Cancelled,
}

/// An open sysfs attribute. Dropping the handle closes it.
pub trait AttrHandle: Send {
    /// Reads from the start of the attribute.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    /// Blocks until the attribute reports an exceptional condition or `stop` fires.
    fn wait_exceptional(&mut self, stop: &StopSignal) -> io::Result<Wakeup>;
}

/// File access capability over a sysfs-like tree.
pub trait SysfsAccess: Send + Sync {
    type Handle: AttrHandle;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Self::Handle>;
}

struct StopInner {
    triggered: AtomicBool,
    read_end: OwnedFd,
    write_end: OwnedFd,
}

/// Cancellation handle for edge waits.
///
/// Backed by a flag and a non-blocking self-pipe, so a waiter blocked in `poll`
/// can watch the read end next to the value descriptor. Once triggered the pipe
/// stays readable; the signal cannot be reset.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    pub fn new() -> Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        // SAFETY: `fds` has room for the two descriptors pipe2 writes.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc == -1 {
            return Err(GpioError::Signal(io::Error::last_os_error()));
        }
        // SAFETY: pipe2 succeeded, both descriptors are open and owned by nobody else.
        let (read_end, write_end) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self {
            inner: Arc::new(StopInner {
                triggered: AtomicBool::new(false),
                read_end,
                write_end,
            }),
        })
    }

    pub fn trigger(&self) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        let byte = [1u8];
        let fd = self.inner.write_end.as_raw_fd();
        // SAFETY: `byte` outlives the call and holds the one byte written.
        let rc = unsafe { libc::write(fd, byte.as_ptr().cast(), 1) };
        if rc != 1 {
            warn!(
                "stop signal pipe write failed: {}",
                io::Error::last_os_error()
            );
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }
}

impl AsFd for StopSignal {
    /// The read end of the self-pipe; readable once the signal has fired.
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.read_end.as_fd()
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

/// Drives the sysfs GPIO lifecycle for numbered pins.
///
/// Nothing is cached: every call derives its path, opens it, and closes it before
/// returning, whether or not the operation succeeded.
pub struct PinController<A: SysfsAccess> {
    config: Arc<SysfsConfig>,
    access: Arc<A>,
}

impl<A: SysfsAccess> PinController<A> {
    pub fn new(config: Arc<SysfsConfig>, access: Arc<A>) -> Self {
        Self { config, access }
    }

    pub fn config(&self) -> &SysfsConfig {
        &self.config
    }

    pub fn export_path(&self) -> PathBuf {
        self.config.root.join("export")
    }

    pub fn unexport_path(&self) -> PathBuf {
        self.config.root.join("unexport")
    }

    pub fn attr_path(&self, pin: u32, attr: Attribute) -> PathBuf {
        self.config
            .root
            .join(format!("gpio{pin}"))
            .join(attr.file_name())
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<A::Handle> {
        debug!("open {} ({mode:?})", path.display());
        self.access
            .open(path, mode)
            .map_err(|e| GpioError::unavailable(path, e))
    }

    fn write_exact(handle: &mut A::Handle, path: &Path, bytes: &[u8]) -> Result<()> {
        debug!(
            "write {:?} to {}",
            String::from_utf8_lossy(bytes),
            path.display()
        );
        match handle.write(bytes) {
            Ok(written) if written == bytes.len() => Ok(()),
            Ok(written) => Err(GpioError::WriteIncomplete {
                path: path.to_path_buf(),
                expected: bytes.len(),
                written,
                source: None,
            }),
            Err(e) => Err(GpioError::WriteIncomplete {
                path: path.to_path_buf(),
                expected: bytes.len(),
                written: 0,
                source: Some(e),
            }),
        }
    }

    fn write_control(&self, path: &Path, pin: u32) -> Result<()> {
        let mut handle = self.open(path, OpenMode::WriteOnly)?;
        Self::write_exact(&mut handle, path, pin.to_string().as_bytes())
    }

    pub fn export(&self, pin: u32) -> Result<()> {
        self.write_control(&self.export_path(), pin)
    }

    /// Unexports `pin`, reporting any failure.
    pub fn try_unexport(&self, pin: u32) -> Result<()> {
        self.write_control(&self.unexport_path(), pin)
    }

    /// Best-effort unexport for cleanup paths; failures are only logged.
    pub fn unexport(&self, pin: u32) {
        if let Err(e) = self.try_unexport(pin) {
            warn!("unexport of gpio{pin} failed: {e}");
        }
    }

    pub fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        let path = self.attr_path(pin, Attribute::Direction);
        let mut handle = self.open(&path, OpenMode::WriteOnly)?;
        Self::write_exact(&mut handle, &path, direction.as_str().as_bytes())
    }

    pub fn set_edge(&self, pin: u32, rising: bool, falling: bool) -> Result<()> {
        self.set_edge_mode(pin, EdgeMode::from_flags(rising, falling))
    }

    /// `EdgeMode::None` opens the attribute and writes nothing.
    pub fn set_edge_mode(&self, pin: u32, mode: EdgeMode) -> Result<()> {
        let path = self.attr_path(pin, Attribute::Edge);
        let mut handle = self.open(&path, OpenMode::WriteOnly)?;
        match mode.literal() {
            Some(literal) => Self::write_exact(&mut handle, &path, literal.as_bytes()),
            None => Ok(()),
        }
    }

    pub fn read_value(&self, pin: u32) -> Result<PinValue> {
        let path = self.attr_path(pin, Attribute::Value);
        let mut handle = self.open(&path, OpenMode::ReadWrite)?;
        self.read_digit(&mut handle, &path)
    }

    // Zero-length reads are retried up to the configured limit.
    fn read_digit(&self, handle: &mut A::Handle, path: &Path) -> Result<PinValue> {
        let mut buf = [0u8; 1];
        let attempts = self.config.read_retries.saturating_add(1);
        for _ in 0..attempts {
            match handle.read(&mut buf) {
                Ok(0) => continue,
                Ok(_) => {
                    return PinValue::from_ascii(buf[0]).ok_or_else(|| {
                        GpioError::read_failed(path, format!("unexpected value byte {:#04x}", buf[0]))
                    });
                }
                Err(e) => return Err(GpioError::read_failed(path, e)),
            }
        }
        Err(GpioError::read_failed(
            path,
            format!("no data after {attempts} reads"),
        ))
    }

    pub fn write_value(&self, pin: u32, value: PinValue) -> Result<()> {
        let path = self.attr_path(pin, Attribute::Value);
        let mut handle = match self.access.open(&path, OpenMode::ReadWrite) {
            Ok(handle) => handle,
            Err(e) => {
                debug!("open {} failed: {e}", path.display());
                return Err(GpioError::InvalidState { path });
            }
        };
        Self::write_exact(&mut handle, &path, &[value.as_ascii(), b'\n'])
    }

    /// Blocks until an edge is reported on `pin`. There is no way to cancel this
    /// call; use [`PinController::wait_for_edge_until`] or [`EdgeWaiter`] for that.
    pub fn wait_for_edge(&self, pin: u32) -> Result<()> {
        let stop = StopSignal::new()?;
        self.wait_for_edge_until(pin, &stop).map(|_| ())
    }

    /// Blocks until an edge is reported on `pin` or `stop` fires.
    pub fn wait_for_edge_until(&self, pin: u32, stop: &StopSignal) -> Result<Wakeup> {
        let path = self.attr_path(pin, Attribute::Value);
        let mut handle = self.open(&path, OpenMode::ReadOnly)?;

        // A fresh value handle is always reported ready once; consume that first.
        let mut scratch = [0u8; 8];
        handle
            .read(&mut scratch)
            .map_err(|e| GpioError::read_failed(&path, e))?;

        loop {
            match handle.wait_exceptional(stop) {
                Ok(Wakeup::Edge) => {
                    // clears the latched notification
                    return handle
                        .read(&mut scratch)
                        .map(|_| Wakeup::Edge)
                        .map_err(|e| GpioError::read_failed(&path, e));
                }
                Ok(Wakeup::Cancelled) => return Ok(Wakeup::Cancelled),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(GpioError::read_failed(&path, e)),
            }
        }
    }
}

/// An edge wait running on its own thread.
///
/// Dropping the waiter cancels the wait and joins the thread.
pub struct EdgeWaiter {
    pin: u32,
    stop: StopSignal,
    handle: Option<JoinHandle<Result<Wakeup>>>,
}

impl EdgeWaiter {
    pub fn spawn<A>(controller: Arc<PinController<A>>, pin: u32) -> Result<Self>
    where
        A: SysfsAccess + 'static,
    {
        let stop = StopSignal::new()?;
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name(format!("gpio{pin}-edge"))
            .spawn(move || controller.wait_for_edge_until(pin, &thread_stop))
            .map_err(GpioError::Signal)?;

        Ok(Self {
            pin,
            stop,
            handle: Some(handle),
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn cancel(&self) {
        self.stop.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the thread to finish; does not cancel it.
    pub fn join(mut self) -> Result<Wakeup> {
        let pin = self.pin;
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(GpioError::read_failed(
                    format!("gpio{pin}"),
                    "edge waiter thread panicked",
                ))
            }),
            None => Ok(Wakeup::Cancelled),
        }
    }
}

impl Drop for EdgeWaiter {
    fn drop(&mut self) {
        self.stop.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_policy_table() {
        assert_eq!(EdgeMode::from_flags(true, true).literal(), Some("both"));
        assert_eq!(EdgeMode::from_flags(true, false).literal(), Some("rising"));
        assert_eq!(EdgeMode::from_flags(false, true).literal(), Some("falling"));
        assert_eq!(EdgeMode::from_flags(false, false).literal(), None);
    }

    #[test]
    fn stop_signal_is_sticky() {
        let stop = StopSignal::new().unwrap();
        let other = stop.clone();
        assert!(!other.is_triggered());
        stop.trigger();
        stop.trigger();
        assert!(other.is_triggered());
    }
}
