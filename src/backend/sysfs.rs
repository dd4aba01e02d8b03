use log::warn;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::gpio::{AttrHandle, OpenMode, StopSignal, SysfsAccess, Wakeup};

/// Real filesystem access, for `/sys/class/gpio` or anything laid out like it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsFs;

impl SysfsFs {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug)]
pub struct SysfsHandle {
    file: File,
}

impl SysfsAccess for SysfsFs {
    type Handle = SysfsHandle;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<SysfsHandle> {
        let file = OpenOptions::new()
            .read(mode.readable())
            .write(mode.writable())
            .open(path)?;
        Ok(SysfsHandle { file })
    }
}

impl AttrHandle for SysfsHandle {
    // sysfs attributes only refresh their content when read from offset 0
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read_at(buf, 0)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn wait_exceptional(&mut self, stop: &StopSignal) -> io::Result<Wakeup> {
        let mut fds = [
            libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLPRI | libc::POLLERR,
                revents: 0,
            },
            libc::pollfd {
                fd: stop.as_fd().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        loop {
            if stop.is_triggered() {
                return Ok(Wakeup::Cancelled);
            }
            for pfd in fds.iter_mut() {
                pfd.revents = 0;
            }

            // SAFETY: `fds` is a live array of `fds.len()` pollfd entries.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            if fds[1].revents != 0 {
                return Ok(Wakeup::Cancelled);
            }
            let revents = fds[0].revents;
            if revents & libc::POLLNVAL != 0 {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            if revents & (libc::POLLPRI | libc::POLLERR) != 0 {
                return Ok(Wakeup::Edge);
            }
            warn!("poll returned with unexpected revents {revents:#x}");
        }
    }
}
