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

//! IPMI Serial-Over-LAN console
//!
//! Reachability is checked with an RMCP/ASF presence ping. The session is
//! carried by an `ipmitool` child process whose stdout is the console stream.

use super::{LineAssembler, LineSource, LogLine, SourceKind};
use crate::config::SolConfig;
use crate::error::SourceError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

const RMCP_VERSION: u8 = 0x06;
const RMCP_CLASS_ASF: u8 = 0x06;
const ASF_IANA: [u8; 4] = [0x00, 0x00, 0x11, 0xBE];
const ASF_PRESENCE_PING: u8 = 0x80;
const ASF_PRESENCE_PONG: u8 = 0x40;
const DEACTIVATE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 4096;

/// Build an RMCP presence ping carrying `tag`
pub fn presence_ping_packet(tag: u8) -> [u8; 12] {
    [
        RMCP_VERSION,
        0x00,
        0xFF, // no RMCP ack
        RMCP_CLASS_ASF,
        ASF_IANA[0],
        ASF_IANA[1],
        ASF_IANA[2],
        ASF_IANA[3],
        ASF_PRESENCE_PING,
        tag,
        0x00,
        0x00,
    ]
}

/// True when `packet` is the pong answering the ping tagged `tag`
pub fn is_presence_pong(packet: &[u8], tag: u8) -> bool {
    packet.len() >= 12 && packet[0] == RMCP_VERSION && packet[3] == RMCP_CLASS_ASF && packet[8] == ASF_PRESENCE_PONG && packet[9] == tag
}

/// Send a presence ping and wait up to `timeout` for the pong
pub async fn presence_ping(host: &str, port: u16, timeout: Duration) -> io::Result<bool> {
    let Some(addr) = tokio::net::lookup_host((host, port)).await?.next() else {
        return Ok(false);
    };
    let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    let tag = (std::process::id() & 0xFF) as u8;
    socket.send(&presence_ping_packet(tag)).await?;

    let mut buf = [0u8; 64];
    match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => Ok(is_presence_pong(&buf[..n], tag)),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(false),
    }
}

pub struct SolSource {
    host: String,
    config: SolConfig,
    child: Option<Child>,
    // Held open so ipmitool does not see end of input
    _stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    assembler: LineAssembler,
    ready: VecDeque<String>,
    idle_timeout: Duration,
    eof: bool,
    buf: Vec<u8>,
}

impl SolSource {
    /// Open a SOL session, clearing any stale session first
    pub async fn activate(host: &str, config: &SolConfig, idle_timeout: Duration) -> Result<Self, SourceError> {
        if let Err(e) = deactivate(host, config).await {
            debug!(host, error = %e, "no stale SOL session to clear");
        }

        let mut child = ipmitool(host, config)
            .args(["sol", "activate"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Session {
                host: host.to_string(),
                detail: format!("cannot start {}: {e}", config.ipmitool.display()),
            })?;
        info!(host, "SOL session activated");

        Ok(Self {
            host: host.to_string(),
            config: config.clone(),
            _stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child: Some(child),
            assembler: LineAssembler::new(),
            ready: VecDeque::new(),
            idle_timeout,
            eof: false,
            buf: vec![0; READ_CHUNK],
        })
    }

    async fn read_chunk(&mut self) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(&mut self.buf).await,
            None => Ok(0),
        }
    }
}

fn ipmitool(host: &str, config: &SolConfig) -> Command {
    let mut cmd = Command::new(&config.ipmitool);
    cmd.args(["-I", "lanplus", "-H", host, "-p"])
        .arg(config.port.to_string())
        .args(["-U", &config.username, "-E"])
        .env("IPMI_PASSWORD", &config.password);
    cmd
}

async fn deactivate(host: &str, config: &SolConfig) -> Result<(), SourceError> {
    let session_error = |detail: String| SourceError::Session {
        host: host.to_string(),
        detail,
    };
    let mut cmd = ipmitool(host, config);
    cmd.args(["sol", "deactivate"]).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    let run = cmd.status();
    match tokio::time::timeout(DEACTIVATE_TIMEOUT, run).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(session_error(format!("sol deactivate exited with {status}"))),
        Ok(Err(e)) => Err(session_error(e.to_string())),
        Err(_) => Err(session_error("sol deactivate timed out".to_string())),
    }
}

#[async_trait]
impl LineSource for SolSource {
    fn describe(&self) -> String {
        format!("sol://{}:{}", self.host, self.config.port)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Sol
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
                    warn!(host = %self.host, timeout_secs = self.idle_timeout.as_secs(), "no SOL data, giving up");
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
                Ok(Err(e)) => return Err(SourceError::io(self.describe(), e)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.eof = true;
        self.stdout = None;
        self._stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Err(e) = child.kill().await {
            warn!(host = %self.host, error = %e, "failed to stop ipmitool");
        }
        deactivate(&self.host, &self.config).await?;
        info!(host = %self.host, "SOL session deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_packet_layout() {
        let packet = presence_ping_packet(0x2A);
        assert_eq!(packet, [0x06, 0x00, 0xFF, 0x06, 0x00, 0x00, 0x11, 0xBE, 0x80, 0x2A, 0x00, 0x00]);
    }

    #[test]
    fn test_pong_detection() {
        let mut pong = presence_ping_packet(7).to_vec();
        pong[8] = ASF_PRESENCE_PONG;
        pong.extend_from_slice(&[0u8; 16]);
        assert!(is_presence_pong(&pong, 7));
        assert!(!is_presence_pong(&pong, 8));
        assert!(!is_presence_pong(&presence_ping_packet(7), 7));
        assert!(!is_presence_pong(&pong[..6], 7));
    }

    #[tokio::test]
    async fn test_ping_answered_by_local_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = responder.recv_from(&mut buf).await.unwrap();
            let mut pong = buf[..n].to_vec();
            pong[8] = ASF_PRESENCE_PONG;
            pong.extend_from_slice(&[0u8; 16]);
            responder.send_to(&pong, peer).await.unwrap();
        });

        assert!(presence_ping("127.0.0.1", port, Duration::from_secs(2)).await.unwrap());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_times_out_without_responder() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        assert!(!presence_ping("127.0.0.1", port, Duration::from_millis(100)).await.unwrap());
    }
}
