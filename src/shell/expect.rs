// src/shell/expect.rs

//! Pattern matching over an interactive byte stream.
//!
//! Incoming chunks are decoded as UTF-8 (sequences may be split across
//! chunks), stripped of terminal control sequences and fed both to the
//! session's [`OutputLog`] and to a match buffer. [`Expect::expect`] waits
//! until a pattern shows up in the buffer and consumes everything up to the
//! end of the match.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::shell::log::OutputLog;
use crate::shell::transport::ShellTransport;
use crate::types::Host;

/// CSI, OSC and two-byte escape sequences.
static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\^_]")
        .expect("valid regex")
});

/// A complete escape sequence at the start of the text.
static COMPLETE_ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^(?:\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\^_])")
        .expect("valid regex")
});

/// Longest escape sequence held back waiting for its terminator.
const MAX_PENDING_ESCAPE: usize = 64;

/// Longest text a pattern is expected to match. A search after new output
/// only goes back this far into text that was already searched.
const MAX_MATCH_SPAN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ExpectError {
    #[error("timed out; buffered output: {buffer:?}")]
    Timeout { buffer: String },

    #[error("stream closed; buffered output: {buffer:?}")]
    Closed { buffer: String },

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Result of a successful [`Expect::expect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// Text received before the match.
    pub before: String,
    pub matched: String,
    /// Capture groups, group 1 first.
    pub groups: Vec<Option<String>>,
    /// Log line index at which the match starts.
    pub line: usize,
    /// Text of that line before the match.
    pub line_prefix: String,
}

impl ExpectMatch {
    /// Everything logged from line `from` up to the start of the match.
    pub fn capture(&self, log: &OutputLog, from: usize) -> String {
        if from > self.line {
            return String::new();
        }
        let mut output = log.slice(from, self.line);
        output.push_str(&self.line_prefix);
        output
    }
}

/// Raw session transcript written next to other session records.
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Transcript {
    /// `<dir>/<user@host:port>-<UTC timestamp>.txt`, one file per connection.
    pub fn create(dir: &Path, host: &Host) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.9fZ");
        let path = dir.join(format!("{host}-{stamp}.txt"));
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&mut self, text: &str) {
        if let Err(e) = self.writer.write_all(text.as_bytes()) {
            warn!(path = %self.path.display(), error = %e, "failed to write transcript");
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

pub struct Expect {
    transport: Box<dyn ShellTransport>,
    log: OutputLog,
    buffer: String,
    /// Stream offset of the first byte still in `buffer`.
    consumed: usize,
    pending_bytes: Vec<u8>,
    pending_escape: String,
    transcript: Option<Transcript>,
}

impl Expect {
    pub fn new(transport: Box<dyn ShellTransport>) -> Self {
        Self {
            transport,
            log: OutputLog::new(),
            buffer: String::new(),
            consumed: 0,
            pending_bytes: Vec::new(),
            pending_escape: String::new(),
            transcript: None,
        }
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn log(&self) -> &OutputLog {
        &self.log
    }

    /// Unconsumed text received so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn transcript_path(&self) -> Option<&Path> {
        self.transcript.as_ref().map(Transcript::path)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send `line` followed by a newline.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        trace!(line, "sending line");
        let mut data = String::with_capacity(line.len() + 1);
        data.push_str(line);
        data.push('\n');
        if let Some(t) = self.transcript.as_mut() {
            t.record(&format!(">>> {data}"));
        }
        self.transport.send(data.as_bytes()).await
    }

    /// Wait until `pattern` matches, reading more output as needed.
    ///
    /// `None` waits indefinitely. On timeout the unconsumed buffer is left in
    /// place and also returned inside the error.
    pub async fn expect(
        &mut self,
        pattern: &Regex,
        timeout: Option<Duration>,
    ) -> Result<ExpectMatch, ExpectError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut searched = 0;

        loop {
            if let Some(found) = self.try_match(pattern, search_start(&self.buffer, searched)) {
                return Ok(found);
            }
            searched = self.buffer.len();

            let chunk = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.transport.recv()).await {
                        Ok(chunk) => chunk?,
                        Err(_) => {
                            debug!(pattern = pattern.as_str(), "expect timed out");
                            return Err(ExpectError::Timeout {
                                buffer: self.buffer.clone(),
                            });
                        }
                    }
                }
                None => self.transport.recv().await?,
            };

            match chunk {
                Some(bytes) => self.feed(&bytes),
                None => {
                    return Err(ExpectError::Closed {
                        buffer: self.buffer.clone(),
                    });
                }
            }
        }
    }

    /// Flush the transcript and close the transport.
    ///
    /// Both are attempted; the first failure is returned.
    pub async fn close(&mut self) -> io::Result<()> {
        let transcript_result = match self.transcript.as_mut() {
            Some(t) => t.flush(),
            None => Ok(()),
        };
        let transport_result = self.transport.close().await;
        transcript_result.and(transport_result)
    }

    fn try_match(&mut self, pattern: &Regex, from: usize) -> Option<ExpectMatch> {
        let caps = pattern.captures_at(&self.buffer, from)?;
        let whole = caps.get(0)?;
        let (start, end) = (whole.start(), whole.end());
        let offset = self.consumed + start;

        let found = ExpectMatch {
            before: self.buffer[..start].to_string(),
            matched: whole.as_str().to_string(),
            groups: caps
                .iter()
                .skip(1)
                .map(|g| g.map(|m| m.as_str().to_string()))
                .collect(),
            line: self.log.line_at(offset),
            line_prefix: self.log.line_prefix(offset).to_string(),
        };

        self.buffer.drain(..end);
        self.consumed += end;
        Some(found)
    }

    fn feed(&mut self, bytes: &[u8]) {
        let decoded = self.decode(bytes);
        if let Some(t) = self.transcript.as_mut() {
            t.record(&decoded);
        }

        let mut text = std::mem::take(&mut self.pending_escape);
        text.push_str(&decoded);

        let split = incomplete_escape_start(&text).unwrap_or(text.len());
        self.pending_escape = text[split..].to_string();

        let clean = filter_control(&text[..split]);
        self.log.append(&clean);
        self.buffer.push_str(&clean);
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        // Sequence continues in the next chunk.
                        None => {
                            self.pending_bytes.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + len);
                        }
                    }
                }
            }
        }

        out
    }
}

/// Where to resume searching `buffer` after its first `searched` bytes
/// produced no match.
fn search_start(buffer: &str, searched: usize) -> usize {
    let mut start = searched.saturating_sub(MAX_MATCH_SPAN).min(buffer.len());
    while !buffer.is_char_boundary(start) {
        start -= 1;
    }
    start
}

/// Start of a trailing escape sequence that has not been terminated yet.
fn incomplete_escape_start(text: &str) -> Option<usize> {
    let pos = text.rfind('\x1b')?;
    let tail = &text[pos..];
    if tail.len() < MAX_PENDING_ESCAPE && !COMPLETE_ESCAPE_RE.is_match(tail) {
        Some(pos)
    } else {
        None
    }
}

/// Remove escape sequences, carriage returns and other non-printables.
fn filter_control(text: &str) -> String {
    ESCAPE_RE
        .replace_all(text, "")
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::shell::transport::BoxFuture;

    /// Replays fixed chunks, then behaves as an idle or closed stream.
    struct Replay {
        chunks: VecDeque<Vec<u8>>,
        close_when_drained: bool,
        sent: Vec<String>,
    }

    impl Replay {
        fn new(chunks: &[&[u8]], close_when_drained: bool) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                close_when_drained,
                sent: Vec::new(),
            }
        }
    }

    impl ShellTransport for Replay {
        fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
            self.sent.push(String::from_utf8_lossy(data).into_owned());
            Box::pin(async { Ok(()) })
        }

        fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Vec<u8>>>> {
            Box::pin(async move {
                match self.chunks.pop_front() {
                    Some(chunk) => Ok(Some(chunk)),
                    None if self.close_when_drained => Ok(None),
                    None => std::future::pending().await,
                }
            })
        }

        fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn re(p: &str) -> Regex {
        Regex::new(p).unwrap()
    }

    #[tokio::test]
    async fn matches_across_chunks_and_reports_line() {
        let t = Replay::new(&[b"one\ntw", b"o\nREADY\nrest"], true);
        let mut e = Expect::new(Box::new(t));

        let m = e.expect(&re("READY\n"), None).await.unwrap();
        assert_eq!(m.before, "one\ntwo\n");
        assert_eq!(m.line, 2);
        assert_eq!(e.log().slice(0, m.line), "one\ntwo\n");
        assert_eq!(e.buffer(), "rest");
    }

    #[tokio::test]
    async fn match_after_unterminated_line_keeps_its_prefix() {
        let t = Replay::new(&[b"a\n1.4", b".2[p]\n"], true);
        let mut e = Expect::new(Box::new(t));

        let m = e.expect(&re(r"\[p\]\n"), None).await.unwrap();
        assert_eq!(m.line, 1);
        assert_eq!(m.line_prefix, "1.4.2");
        assert_eq!(m.capture(e.log(), 0), "a\n1.4.2");
        assert_eq!(m.capture(e.log(), 2), "");
    }

    #[tokio::test]
    async fn long_output_is_searched_incrementally() {
        let line = "x".repeat(1023) + "\n";
        let mut chunks: Vec<Vec<u8>> = (0..200).map(|_| line.clone().into_bytes()).collect();
        chunks.push(b"DO".to_vec());
        chunks.push(b"NE\n".to_vec());
        let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
        let mut e = Expect::new(Box::new(Replay::new(&refs, true)));

        let m = e.expect(&re("DONE\n"), None).await.unwrap();
        assert_eq!(m.line, 200);
        assert_eq!(m.before.len(), 200 * 1024);
        assert_eq!(m.capture(e.log(), 199), line);
    }

    #[test]
    fn search_start_respects_char_boundaries() {
        let text = "é".repeat(MAX_MATCH_SPAN);
        assert_eq!(search_start(&text, 10), 0);
        let start = search_start(&text, MAX_MATCH_SPAN + 3);
        assert!(text.is_char_boundary(start));
        assert!(start <= 3);
    }

    #[tokio::test]
    async fn strips_escapes_and_carriage_returns() {
        let t = Replay::new(&[b"\x1b[1;32mok\x1b", b"[0m\r\n$ "], true);
        let mut e = Expect::new(Box::new(t));

        let m = e.expect(&re(r"\$"), None).await.unwrap();
        assert_eq!(m.before, "ok\n");
        assert_eq!(e.log().line(0), Some("ok\n"));
    }

    #[tokio::test]
    async fn decodes_utf8_split_between_chunks() {
        // "é" is 0xC3 0xA9
        let t = Replay::new(&[b"caf\xC3", b"\xA9\n#"], true);
        let mut e = Expect::new(Box::new(t));

        let m = e.expect(&re("#"), None).await.unwrap();
        assert_eq!(m.before, "café\n");
    }

    #[tokio::test]
    async fn capture_groups_are_returned() {
        let t = Replay::new(&[b"x --42-- y"], true);
        let mut e = Expect::new(Box::new(t));

        let m = e.expect(&re("--([0-9]+)--"), None).await.unwrap();
        assert_eq!(m.groups, vec![Some("42".to_string())]);
    }

    #[tokio::test]
    async fn timeout_returns_buffered_text() {
        let t = Replay::new(&[b"partial Exception"], false);
        let mut e = Expect::new(Box::new(t));

        let err = e
            .expect(&re("never"), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        match err {
            ExpectError::Timeout { buffer } => assert_eq!(buffer, "partial Exception"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_stream_is_reported() {
        let t = Replay::new(&[b"bye\n"], true);
        let mut e = Expect::new(Box::new(t));

        let err = e.expect(&re("never"), None).await.unwrap_err();
        assert!(matches!(err, ExpectError::Closed { .. }));
    }

    #[test]
    fn transcript_file_name_contains_host() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::new("node1", 2222, "deploy");
        let transcript = Transcript::create(dir.path(), &host).unwrap();

        let name = transcript.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("deploy@node1:2222-"));
        assert!(name.ends_with(".txt"));
    }
}
