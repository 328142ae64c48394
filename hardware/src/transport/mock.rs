//! Scripted in-memory transport for protocol tests.
//!
//! Replies are queued up front and released one per `write_all`, so a driver
//! sees the same request/response rhythm a real instrument produces. Reads
//! with nothing pending time out immediately.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Transport, TransportError, TransportResult};

#[derive(Default)]
struct Script {
    /// Replies released by successive writes; each reply may be fragmented.
    replies: VecDeque<Vec<Vec<u8>>>,
    /// Chunks ready to be read.
    pending: VecDeque<Vec<u8>>,
    /// Everything the driver wrote, one entry per write.
    written: Vec<Vec<u8>>,
}

/// Clonable handle onto a shared script; keep one clone in the test to
/// inspect what the driver sent.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Queue a reply for the next write.
    pub fn reply(&self, bytes: impl AsRef<[u8]>) -> &Self {
        self.script()
            .replies
            .push_back(vec![bytes.as_ref().to_vec()]);
        self
    }

    /// Queue a reply that arrives in several reads.
    pub fn reply_fragmented(&self, chunks: &[&[u8]]) -> &Self {
        self.script()
            .replies
            .push_back(chunks.iter().map(|c| c.to_vec()).collect());
        self
    }

    /// The next write gets no answer.
    pub fn silent(&self) -> &Self {
        self.script().replies.push_back(Vec::new());
        self
    }

    /// Make bytes readable right away, without a preceding write.
    pub fn push_input(&self, bytes: impl AsRef<[u8]>) {
        self.script().pending.push_back(bytes.as_ref().to_vec());
    }

    /// All writes so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.script().written.clone()
    }

    /// All writes so far, lossily decoded.
    pub fn written_strings(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Number of queued replies not yet released.
    pub fn unused_replies(&self) -> usize {
        self.script().replies.len()
    }
}

impl Transport for ScriptedTransport {
    fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        let mut script = self.script();
        script.written.push(data.to_vec());
        if let Some(chunks) = script.replies.pop_front() {
            script.pending.extend(chunks);
        }
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8], _timeout: Duration) -> TransportResult<usize> {
        let mut script = self.script();
        let Some(mut chunk) = script.pending.pop_front() else {
            return Err(TransportError::Timeout);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            script.pending.push_front(chunk);
        }
        Ok(n)
    }

    fn info(&self) -> String {
        "mock;scripted".to_string()
    }
}
