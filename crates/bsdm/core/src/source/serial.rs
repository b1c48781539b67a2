// BSDM
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Directly attached serial console
//!
//! The device is opened non-blocking and driven through [`AsyncFd`], so a
//! pending read is just a suspended future that can be dropped when the run
//! is cancelled.

use super::{LineAssembler, LineSource, LogLine, SourceKind};
use crate::error::SourceError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;

pub struct SerialSource {
    path: PathBuf,
    fd: Option<AsyncFd<File>>,
    assembler: LineAssembler,
    ready: VecDeque<String>,
    idle_timeout: Duration,
    eof: bool,
    buf: Vec<u8>,
}

impl SerialSource {
    /// Open the device raw 8N1 at `baud_rate`
    pub fn open(path: &Path, baud_rate: u32, idle_timeout: Duration) -> Result<Self, SourceError> {
        let target = path.display().to_string();
        let mut options = OpenOptions::new();
        options.read(true).write(true).custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY);
        let file = options.open(path).map_err(|e| SourceError::io(&target, e))?;

        configure_raw(file.as_raw_fd(), baud_rate).map_err(|e| SourceError::io(&target, e))?;
        let fd = AsyncFd::new(file).map_err(|e| SourceError::io(&target, e))?;
        debug!(device = %target, baud_rate, "serial console configured");

        Ok(Self {
            path: path.to_path_buf(),
            fd: Some(fd),
            assembler: LineAssembler::new(),
            ready: VecDeque::new(),
            idle_timeout,
            eof: false,
            buf: vec![0; READ_CHUNK],
        })
    }

    async fn read_chunk(&mut self) -> io::Result<usize> {
        let Some(fd) = self.fd.as_ref() else {
            return Ok(0);
        };
        loop {
            let mut guard = fd.readable().await?;
            let buf = &mut self.buf;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl LineSource for SerialSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::SerialConsole
    }

    async fn next_line(&mut self) -> Result<Option<LogLine>, SourceError> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(LogLine::new(&line)));
            }
            if self.eof {
                return Ok(None);
            }
            match tokio::time::timeout(self.idle_timeout, self.read_chunk()).await {
                Err(_) => {
                    warn!(device = %self.path.display(), timeout_secs = self.idle_timeout.as_secs(), "no console data, giving up");
                    self.eof = true;
                    self.ready.extend(self.assembler.finish());
                }
                Ok(Ok(0)) => {
                    self.eof = true;
                    self.ready.extend(self.assembler.finish());
                }
                Ok(Ok(n)) => {
                    let lines = self.assembler.push(&self.buf[..n]);
                    self.ready.extend(lines);
                }
                Ok(Err(e)) => return Err(SourceError::io(self.path.display().to_string(), e)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if self.fd.take().is_some() {
            debug!(device = %self.path.display(), "serial console closed");
        }
        self.eof = true;
        Ok(())
    }
}

fn baud_constant(baud_rate: u32) -> io::Result<libc::speed_t> {
    let speed = match baud_rate {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("unsupported baud rate {baud_rate}"))),
    };
    Ok(speed)
}

/// Raw mode, 8 data bits, no parity, one stop bit
fn configure_raw(fd: RawFd, baud_rate: u32) -> io::Result<()> {
    let speed = baud_constant(baud_rate)?;
    // SAFETY: `fd` is an open descriptor owned by the caller and `tio` is fully
    // initialised by tcgetattr before use.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CSIZE);
        tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
