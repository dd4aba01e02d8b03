use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::config::DEFAULT_GPIO_ROOT;
use crate::gpio::{
    AttrHandle, Attribute, Direction, EdgeMode, OpenMode, PinValue, StopSignal, SysfsAccess,
    Wakeup,
};

const SIM_WAIT_SLICE: Duration = Duration::from_millis(10);

/// In-memory stand-in for the kernel's GPIO sysfs tree.
///
/// Follows the kernel contract closely enough to exercise every sequencing rule:
/// exporting creates the `gpio<N>` attributes, unexporting removes them and
/// invalidates open handles, a freshly opened value handle reports one spurious
/// exceptional condition until it is read, and edges on input lines latch a
/// notification that a read clears.
#[derive(Clone)]
pub struct SimulatedSysfs {
    root: PathBuf,
    shared: Arc<Shared>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimWrite {
    pub path: PathBuf,
    pub data: Vec<u8>,
}

struct Shared {
    state: Mutex<SimState>,
    changed: Condvar,
}

#[derive(Default)]
struct SimState {
    pins: FxHashMap<u32, SimPin>,
    blocked: FxHashMap<u32, usize>,
    next_generation: u64,
    deny_control: bool,
    write_limit: Option<usize>,
    zero_reads: u32,
    journal: Vec<SimWrite>,
}

struct SimPin {
    generation: u64,
    direction: Direction,
    edge: EdgeMode,
    value: PinValue,
    events: u64,
}

#[derive(Clone, Copy)]
enum Node {
    Export,
    Unexport,
    Attr {
        pin: u32,
        generation: u64,
        attr: Attribute,
    },
}

pub struct SimHandle {
    shared: Arc<Shared>,
    path: PathBuf,
    node: Node,
    mode: OpenMode,
    seen_events: Option<u64>,
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn parse_pin(data: &[u8]) -> io::Result<u32> {
    std::str::from_utf8(data)
        .ok()
        .map(|s| s.trim_end_matches(['\n', '\0']))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| errno(libc::EINVAL))
}

fn literal(data: &[u8]) -> &str {
    std::str::from_utf8(data)
        .unwrap_or("")
        .trim_end_matches(['\n', '\0'])
}

impl Default for SimulatedSysfs {
    fn default() -> Self {
        Self::new(DEFAULT_GPIO_ROOT)
    }
}

impl SimulatedSysfs {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(SimState::default()),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        self.shared.state.lock().pins.contains_key(&pin)
    }

    pub fn direction(&self, pin: u32) -> Option<Direction> {
        self.shared.state.lock().pins.get(&pin).map(|p| p.direction)
    }

    pub fn edge(&self, pin: u32) -> Option<EdgeMode> {
        self.shared.state.lock().pins.get(&pin).map(|p| p.edge)
    }

    pub fn value(&self, pin: u32) -> Option<PinValue> {
        self.shared.state.lock().pins.get(&pin).map(|p| p.value)
    }

    /// Number of edge notifications latched on `pin` since export.
    pub fn event_count(&self, pin: u32) -> Option<u64> {
        self.shared.state.lock().pins.get(&pin).map(|p| p.events)
    }

    /// Handles currently blocked waiting for an exceptional condition on `pin`.
    pub fn blocked_waiters(&self, pin: u32) -> usize {
        self.shared
            .state
            .lock()
            .blocked
            .get(&pin)
            .copied()
            .unwrap_or(0)
    }

    /// Every write that reached the tree, in order, with the bytes actually accepted.
    pub fn journal(&self) -> Vec<SimWrite> {
        self.shared.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.shared.state.lock().journal.clear();
    }

    /// Makes `export` and `unexport` refuse to open, as without GPIO permissions.
    pub fn deny_control_files(&self, deny: bool) {
        self.shared.state.lock().deny_control = deny;
    }

    /// Caps the bytes accepted per write; truncated writes are not applied.
    pub fn limit_writes(&self, limit: Option<usize>) {
        self.shared.state.lock().write_limit = limit;
    }

    /// The next `count` value reads return zero bytes.
    pub fn inject_zero_reads(&self, count: u32) {
        self.shared.state.lock().zero_reads = count;
    }

    /// Drives an input line from outside, latching an edge event when the
    /// configured edge matches the transition.
    pub fn drive_input(&self, pin: u32, value: PinValue) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        let sim_pin = state
            .pins
            .get_mut(&pin)
            .ok_or_else(|| errno(libc::ENOENT))?;
        if sim_pin.direction != Direction::In {
            return Err(errno(libc::EPERM));
        }

        let old = sim_pin.value;
        sim_pin.value = value;
        if sim_pin.edge.matches(old, value) {
            sim_pin.events += 1;
        }
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn resolve(&self, path: &Path) -> io::Result<Node> {
        let rel = path.strip_prefix(&self.root).map_err(|_| errno(libc::ENOENT))?;
        let parts: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();

        let state = self.shared.state.lock();
        match parts.as_slice() {
            ["export"] | ["unexport"] if state.deny_control => Err(errno(libc::EACCES)),
            ["export"] => Ok(Node::Export),
            ["unexport"] => Ok(Node::Unexport),
            [dir, name] => {
                let pin: u32 = dir
                    .strip_prefix("gpio")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| errno(libc::ENOENT))?;
                let attr = Attribute::from_file_name(name).ok_or_else(|| errno(libc::ENOENT))?;
                let sim_pin = state.pins.get(&pin).ok_or_else(|| errno(libc::ENOENT))?;
                Ok(Node::Attr {
                    pin,
                    generation: sim_pin.generation,
                    attr,
                })
            }
            _ => Err(errno(libc::ENOENT)),
        }
    }
}

impl SysfsAccess for SimulatedSysfs {
    type Handle = SimHandle;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<SimHandle> {
        let node = self.resolve(path)?;
        if matches!(node, Node::Export | Node::Unexport) && mode.readable() {
            return Err(errno(libc::EACCES));
        }
        Ok(SimHandle {
            shared: self.shared.clone(),
            path: path.to_path_buf(),
            node,
            mode,
            seen_events: None,
        })
    }
}

impl SimState {
    fn live_pin(&mut self, pin: u32, generation: u64) -> io::Result<&mut SimPin> {
        self.pins
            .get_mut(&pin)
            .filter(|p| p.generation == generation)
            .ok_or_else(|| errno(libc::ENODEV))
    }

    fn apply(&mut self, node: Node, data: &[u8]) -> io::Result<()> {
        match node {
            Node::Export => {
                let pin = parse_pin(data)?;
                if self.pins.contains_key(&pin) {
                    return Err(errno(libc::EBUSY));
                }
                let generation = self.next_generation;
                self.next_generation += 1;
                self.pins.insert(
                    pin,
                    SimPin {
                        generation,
                        direction: Direction::In,
                        edge: EdgeMode::None,
                        value: PinValue::Low,
                        events: 0,
                    },
                );
                Ok(())
            }
            Node::Unexport => {
                let pin = parse_pin(data)?;
                self.pins
                    .remove(&pin)
                    .map(|_| ())
                    .ok_or_else(|| errno(libc::EINVAL))
            }
            Node::Attr {
                pin,
                generation,
                attr,
            } => {
                let sim_pin = self.live_pin(pin, generation)?;
                let text = literal(data);
                match attr {
                    Attribute::Direction => match text {
                        "in" => sim_pin.direction = Direction::In,
                        "out" | "low" => {
                            sim_pin.direction = Direction::Out;
                            sim_pin.value = PinValue::Low;
                        }
                        "high" => {
                            sim_pin.direction = Direction::Out;
                            sim_pin.value = PinValue::High;
                        }
                        _ => return Err(errno(libc::EINVAL)),
                    },
                    Attribute::Edge => {
                        sim_pin.edge = match text {
                            "none" => EdgeMode::None,
                            "rising" => EdgeMode::Rising,
                            "falling" => EdgeMode::Falling,
                            "both" => EdgeMode::Both,
                            _ => return Err(errno(libc::EINVAL)),
                        }
                    }
                    Attribute::Value => {
                        if sim_pin.direction != Direction::Out {
                            return Err(errno(libc::EPERM));
                        }
                        let level: i64 = text.parse().map_err(|_| errno(libc::EINVAL))?;
                        sim_pin.value = PinValue::from(level != 0);
                    }
                }
                Ok(())
            }
        }
    }
}

impl AttrHandle for SimHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.mode.readable() {
            return Err(errno(libc::EBADF));
        }
        let Node::Attr {
            pin,
            generation,
            attr,
        } = self.node
        else {
            return Err(errno(libc::EACCES));
        };

        let mut state = self.shared.state.lock();
        if attr == Attribute::Value && state.zero_reads > 0 {
            state.live_pin(pin, generation)?;
            state.zero_reads -= 1;
            return Ok(0);
        }

        let sim_pin = state.live_pin(pin, generation)?;
        let content = match attr {
            Attribute::Direction => format!("{}\n", sim_pin.direction.as_str()),
            Attribute::Edge => format!("{}\n", sim_pin.edge.literal().unwrap_or("none")),
            Attribute::Value => format!("{}\n", sim_pin.value),
        };
        self.seen_events = Some(sim_pin.events);

        let n = content.len().min(buf.len());
        buf[..n].copy_from_slice(&content.as_bytes()[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.mode.writable() {
            return Err(errno(libc::EBADF));
        }

        let mut state = self.shared.state.lock();
        let accepted = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.journal.push(SimWrite {
            path: self.path.clone(),
            data: buf[..accepted].to_vec(),
        });
        if accepted < buf.len() {
            return Ok(accepted);
        }

        state.apply(self.node, buf)?;
        drop(state);
        self.shared.changed.notify_all();
        Ok(accepted)
    }

    fn wait_exceptional(&mut self, stop: &StopSignal) -> io::Result<Wakeup> {
        let Node::Attr {
            pin, generation, ..
        } = self.node
        else {
            return Err(errno(libc::EINVAL));
        };

        let mut state = self.shared.state.lock();
        *state.blocked.entry(pin).or_default() += 1;
        let outcome = loop {
            if stop.is_triggered() {
                break Ok(Wakeup::Cancelled);
            }
            match state.live_pin(pin, generation) {
                Ok(sim_pin) if self.seen_events != Some(sim_pin.events) => break Ok(Wakeup::Edge),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
            self.shared.changed.wait_for(&mut state, SIM_WAIT_SLICE);
        };
        if let Some(count) = state.blocked.get_mut(&pin) {
            *count = count.saturating_sub(1);
        }
        outcome
    }
}
