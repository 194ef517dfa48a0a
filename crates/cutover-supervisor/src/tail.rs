//! LogTailer — live line stream over an instance's output sink.
//!
//! A stream optionally replays the sink from the start, then follows
//! appended lines forever. Between lines it sleeps for the poll
//! interval; it ends only when the subscriber drops it.

use std::io::SeekFrom;
use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use futures_util::stream;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, warn};

use cutover_core::VersionId;

use crate::error::TailError;
use crate::sink::LogSinks;

/// One complete line from a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// Position in this subscription, starting at 0.
    pub seq: u64,
    /// Line contents without the trailing newline.
    pub text: String,
}

/// Infinite, non-restartable line stream.
pub type LogStream = Pin<Box<dyn Stream<Item = LogLine> + Send>>;

#[derive(Debug, Clone)]
pub struct LogTailer {
    sinks: LogSinks,
    poll: Duration,
}

struct TailState {
    reader: BufReader<File>,
    pending: Vec<u8>,
    seq: u64,
    poll: Duration,
    version_id: VersionId,
}

impl LogTailer {
    pub fn new(sinks: LogSinks, poll: Duration) -> Self {
        Self { sinks, poll }
    }

    /// Subscribe to a version's output.
    ///
    /// With `from_start` every line already in the sink is replayed
    /// first; otherwise the stream begins at the current end.
    pub async fn stream(
        &self,
        version_id: &VersionId,
        from_start: bool,
    ) -> Result<LogStream, TailError> {
        let path = self.sinks.path_for(version_id);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TailError::NotFound(version_id.clone()));
            }
            Err(e) => return Err(TailError::Io(e)),
        };
        if !from_start {
            file.seek(SeekFrom::End(0)).await?;
        }
        debug!(%version_id, from_start, "log tail subscribed");

        let state = TailState {
            reader: BufReader::new(file),
            pending: Vec::new(),
            seq: 0,
            poll: self.poll,
            version_id: version_id.clone(),
        };
        Ok(Box::pin(stream::unfold(state, next_line)))
    }
}

/// Produce the next complete line, waiting for the writer as needed.
///
/// A trailing fragment without its newline stays in `pending` until the
/// rest of the line arrives.
async fn next_line(mut state: TailState) -> Option<(LogLine, TailState)> {
    loop {
        match state.reader.read_until(b'\n', &mut state.pending).await {
            Ok(_) if state.pending.last() == Some(&b'\n') => {
                let raw = std::mem::take(&mut state.pending);
                let text = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                let line = LogLine {
                    seq: state.seq,
                    text,
                };
                state.seq += 1;
                return Some((line, state));
            }
            Ok(_) => tokio::time::sleep(state.poll).await,
            Err(e) => {
                warn!(version_id = %state.version_id, error = %e, "log tail read failed");
                tokio::time::sleep(state.poll).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::io::Write;

    fn setup() -> (tempfile::TempDir, LogTailer, VersionId) {
        let dir = tempfile::tempdir().unwrap();
        let tailer = LogTailer::new(LogSinks::new(dir.path()), Duration::from_millis(10));
        let id = VersionId::parse("v1").unwrap();
        (dir, tailer, id)
    }

    fn append(dir: &tempfile::TempDir, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.path().join("v1.log"))
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn next(stream: &mut LogStream) -> LogLine {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("line within timeout")
            .expect("stream never ends")
    }

    #[tokio::test]
    async fn unknown_version_is_not_found() {
        let (_dir, tailer, id) = setup();
        let err = tailer.stream(&id, true).await.err().unwrap();
        assert!(matches!(err, TailError::NotFound(_)));
    }

    #[tokio::test]
    async fn replays_then_follows() {
        let (dir, tailer, id) = setup();
        append(&dir, "L1\nL2\n");

        let mut stream = tailer.stream(&id, true).await.unwrap();
        assert_eq!(next(&mut stream).await.text, "L1");
        assert_eq!(next(&mut stream).await.text, "L2");

        append(&dir, "L3\n");
        let line = next(&mut stream).await;
        assert_eq!(line.text, "L3");
        assert_eq!(line.seq, 2);
    }

    #[tokio::test]
    async fn from_end_skips_history() {
        let (dir, tailer, id) = setup();
        append(&dir, "old\n");

        let mut stream = tailer.stream(&id, false).await.unwrap();
        append(&dir, "new\n");
        let line = next(&mut stream).await;
        assert_eq!(line.text, "new");
        assert_eq!(line.seq, 0);
    }

    #[tokio::test]
    async fn partial_lines_wait_for_newline() {
        let (dir, tailer, id) = setup();
        append(&dir, "hel");

        let mut stream = tailer.stream(&id, true).await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err(), "fragment must not be emitted");

        append(&dir, "lo\r\n");
        assert_eq!(next(&mut stream).await.text, "hello");
    }

    #[tokio::test]
    async fn idle_stream_does_not_terminate() {
        let (dir, tailer, id) = setup();
        append(&dir, "");

        let mut stream = tailer.stream(&id, true).await.unwrap();
        let idle = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(idle.is_err());
    }
}
