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

//! Captured console log on disk

use super::{LineAssembler, LineSource, LogLine, SourceKind};
use crate::error::SourceError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const READ_CHUNK: usize = 64 * 1024;

/// Finite, restartable file source
pub struct LogFileSource {
    path: PathBuf,
    file: File,
    assembler: LineAssembler,
    ready: VecDeque<String>,
    eof: bool,
    buf: Vec<u8>,
}

impl LogFileSource {
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).await.map_err(|e| SourceError::io(path.display().to_string(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            assembler: LineAssembler::new(),
            ready: VecDeque::new(),
            eof: false,
            buf: vec![0; READ_CHUNK],
        })
    }

    async fn fill(&mut self) -> Result<(), SourceError> {
        while self.ready.is_empty() && !self.eof {
            let n = self.file.read(&mut self.buf).await.map_err(|e| SourceError::io(self.path.display().to_string(), e))?;
            if n == 0 {
                self.eof = true;
                self.ready.extend(self.assembler.finish());
            } else {
                let lines = self.assembler.push(&self.buf[..n]);
                self.ready.extend(lines);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LineSource for LogFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LogFile
    }

    async fn next_line(&mut self) -> Result<Option<LogLine>, SourceError> {
        self.fill().await?;
        Ok(self.ready.pop_front().map(|l| LogLine::new(&l)))
    }

    async fn restart(&mut self) -> Result<(), SourceError> {
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| SourceError::io(self.path.display().to_string(), e))?;
        self.assembler = LineAssembler::new();
        self.ready.clear();
        self.eof = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(source: &mut LogFileSource) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = source.next_line().await.unwrap() {
            out.push(line.text);
        }
        out
    }

    #[tokio::test]
    async fn test_reads_normalized_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        std::fs::write(&path, b"\x1b[0mSTART_DIMMINFO_TABLE\r\nDDR Freq | DDR4-2666\nno newline").unwrap();

        let mut source = LogFileSource::open(&path).await.unwrap();
        assert_eq!(collect(&mut source).await, vec!["START_DIMMINFO_TABLE", "DDR Freq | DDR4-2666", "no newline"]);
        assert!(source.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let mut source = LogFileSource::open(&path).await.unwrap();
        let first = collect(&mut source).await;
        source.restart().await.unwrap();
        assert_eq!(collect(&mut source).await, first);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = LogFileSource::open(Path::new("/nonexistent/bsdm.log")).await.err().unwrap();
        assert!(matches!(err, SourceError::Io { .. }));
    }
}
