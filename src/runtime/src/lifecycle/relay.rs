//! Container log relay.
//!
//! Runtime log frames do not line up with lines: one frame may hold several
//! lines or end mid-line. The relay reassembles lines per stream before they
//! reach the sink.

use std::sync::Arc;

use cnb_compose_core::error::{ComposeError, Result};
use cnb_compose_core::log::{LogSink, LogStreamKind};
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::engine::{LogChunk, LogStream};

/// Splits frames into lines, keeping partial lines per stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame, emitting every line it completes.
    pub fn push(&mut self, chunk: &LogChunk, mut emit: impl FnMut(LogStreamKind, &str)) {
        let pending = self.pending(chunk.stream);
        pending.extend_from_slice(&chunk.message);

        let mut start = 0;
        while let Some(pos) = pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            emit(chunk.stream, &decode(&pending[start..end]));
            start = end + 1;
        }
        pending.drain(..start);
    }

    /// Emit whatever is left over once the stream has ended.
    pub fn finish(&mut self, mut emit: impl FnMut(LogStreamKind, &str)) {
        for stream in [LogStreamKind::Stdout, LogStreamKind::Stderr] {
            let pending = std::mem::take(self.pending(stream));
            if !pending.is_empty() {
                emit(stream, &decode(&pending));
            }
        }
    }

    fn pending(&mut self, stream: LogStreamKind) -> &mut Vec<u8> {
        match stream {
            LogStreamKind::Stdout => &mut self.stdout,
            LogStreamKind::Stderr => &mut self.stderr,
        }
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Forward a log stream to `sink` line by line until it ends.
pub async fn relay_logs(mut stream: LogStream, sink: Arc<dyn LogSink>) -> Result<()> {
    let mut splitter = LineSplitter::new();
    let emit = |kind: LogStreamKind, line: &str| sink.line(kind, line);

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => splitter.push(&chunk, emit),
            Err(e) => {
                splitter.finish(emit);
                return Err(e);
            }
        }
    }
    splitter.finish(emit);
    Ok(())
}

/// Relay task that is aborted when dropped before being joined.
pub struct LogRelay {
    handle: Option<JoinHandle<Result<()>>>,
}

impl LogRelay {
    /// Start relaying `stream` to `sink` on the current runtime.
    pub fn spawn(stream: LogStream, sink: Arc<dyn LogSink>) -> Self {
        Self {
            handle: Some(tokio::spawn(relay_logs(stream, sink))),
        }
    }

    /// Wait for the stream to end.
    pub async fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| ComposeError::Interrupted(format!("log relay: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for LogRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
