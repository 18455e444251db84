//! Component C: RESP (REdis Serialization Protocol) framing.
//!
//! The teacher's own wire handling is split across `redis/client.rs`
//! (`query_buf`, `process_input_buffer`) and `redis/cmd.rs`
//! (`process_multibulk_buffer` / `process_inline_buffer`), both driven from
//! the now-dropped `ae` event loop. This module keeps the same two-mode
//! split — multibulk (`*<n>\r\n$<len>\r\n<bytes>\r\n...`) and inline — but
//! as a pure, loop-independent decoder: `Decoder::feed` + `Decoder::next_command`
//! consume whatever bytes arrive and report `Ok(None)` when more are needed,
//! rather than requiring a fixed-size pre-read like the teacher's C-flavored
//! buffer walk.

use crate::bytes::RedisBytes;
use crate::error::RespError;

/// A single, fully-decoded command: the argument vector of a multibulk or
/// inline request. `spec.md` §4.C: "A command is an array of bulk strings."
pub type Command = Vec<RedisBytes>;

/// One RESP reply frame. Encoding always goes through `Frame`; handlers
/// never write raw `\r\n`-terminated bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(RedisBytes),
    NullBulk,
    Array(Vec<Frame>),
    NullArray,
    /// Already-encoded bytes, written verbatim. Used only for the `PSYNC`
    /// handshake reply, which is a status line immediately followed by a
    /// raw bulk payload rather than a proper multibulk array (`spec.md`
    /// §4.H) — a reply `Decoder` expecting an array of bulk strings can't
    /// parse `*2\r\n+FULLRESYNC ...\r\n$<len>...`.
    Raw(Vec<u8>),
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Simple(crate::bytes::literals::OK.to_string())
    }

    pub fn bulk(bytes: impl Into<RedisBytes>) -> Self {
        Frame::Bulk(bytes.into())
    }

    pub fn from_error(err: impl std::fmt::Display) -> Self {
        Frame::Error(err.to_string())
    }

    /// Serializes this frame, appending to `out`. Recursive but bounded by
    /// actual reply nesting (arrays of arrays), never by attacker input
    /// depth beyond what `Decoder` itself already bounded on the way in.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Integer(i) => {
                out.push(b':');
                out.extend_from_slice(i.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Bulk(b) => {
                out.push(b'$');
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(b.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Frame::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Frame::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
            Frame::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }

    /// Convenience: encode straight into a freshly pre-sized `Vec`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.estimate_size());
        self.encode(&mut out);
        out
    }

    fn estimate_size(&self) -> usize {
        match self {
            Frame::Simple(s) | Frame::Error(s) => s.len() + 3,
            Frame::Integer(_) => 20,
            Frame::Bulk(b) => b.len() + 16,
            Frame::NullBulk | Frame::NullArray => 5,
            Frame::Array(items) => {
                8 + items.iter().map(Frame::estimate_size).sum::<usize>()
            }
            Frame::Raw(bytes) => bytes.len(),
        }
    }
}

/// Encodes a `PSYNC` handshake reply: a status line (`FULLRESYNC <replid>
/// <offset>` or `CONTINUE`) followed immediately by `payload` as a raw bulk
/// string, with no enclosing array (`spec.md` §4.H). The follower parses
/// this with `read_psync_handshake` rather than the command `Decoder`, since
/// the status line is a simple string, not a bulk string array element.
pub fn encode_psync_handshake(status: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(status.len() + payload.len() + 24);
    out.push(b'+');
    out.extend_from_slice(status.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.push(b'$');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

/// Encodes a command (as sent client -> server, or propagated to an AOF /
/// replica) as a multibulk array of bulk strings. Used by `aof.rs` and
/// `replication.rs` so propagated frames are byte-identical to what a real
/// client would have sent.
pub fn encode_command(args: &[RedisBytes]) -> Vec<u8> {
    let frame = Frame::Array(args.iter().cloned().map(Frame::Bulk).collect());
    frame.to_bytes()
}

const MAX_INLINE_LEN: usize = 64 * 1024;
const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Parse state for an in-progress multibulk command, so partial reads don't
/// re-walk work already done.
enum ParseState {
    Idle,
    InMultibulk {
        expected_args: i64,
        args: Vec<RedisBytes>,
        next_bulk_len: Option<i64>,
    },
}

/// Incremental RESP decoder over an accumulating byte buffer. One instance
/// lives per connection (`spec.md` §4.C).
pub struct Decoder {
    buf: Vec<u8>,
    state: ParseState,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: ParseState::Idle,
        }
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempts to decode one full command from the buffered bytes.
    /// Returns `Ok(None)` when more bytes are needed, `Ok(Some(cmd))` on a
    /// complete command (already drained from the buffer), or `Err` on a
    /// protocol violation.
    pub fn next_command(&mut self) -> Result<Option<Command>, RespError> {
        loop {
            if self.buf.is_empty() {
                return Ok(None);
            }
            match &self.state {
                ParseState::Idle => {
                    if self.buf[0] == b'*' {
                        match self.start_multibulk()? {
                            Some(cmd) => return Ok(Some(cmd)),
                            None => {
                                if matches!(self.state, ParseState::Idle) {
                                    return Ok(None);
                                }
                                continue;
                            }
                        }
                    } else {
                        return self.try_inline();
                    }
                }
                ParseState::InMultibulk { .. } => match self.continue_multibulk()? {
                    Some(cmd) => return Ok(Some(cmd)),
                    None => return Ok(None),
                },
            }
        }
    }

    fn find_crlf(&self, from: usize) -> Option<usize> {
        self.buf[from..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|p| from + p)
    }

    fn start_multibulk(&mut self) -> Result<Option<Command>, RespError> {
        let Some(eol) = self.find_crlf(0) else {
            if self.buf.len() > MAX_INLINE_LEN {
                return Err(RespError::InlineTooLong);
            }
            return Ok(None);
        };
        let line = std::str::from_utf8(&self.buf[1..eol]).map_err(|_| RespError::InvalidArrayLength(-1))?;
        let count: i64 = line.parse().map_err(|_| RespError::InvalidArrayLength(-1))?;
        self.buf.drain(..eol + 2);
        if count <= 0 {
            // `*0\r\n` or a negative count: no command, caller loops again.
            self.state = ParseState::Idle;
            return Ok(None);
        }
        if count > MAX_MULTIBULK_LEN {
            return Err(RespError::InvalidArrayLength(count));
        }
        self.state = ParseState::InMultibulk {
            expected_args: count,
            args: Vec::with_capacity(count as usize),
            next_bulk_len: None,
        };
        Ok(None)
    }

    fn continue_multibulk(&mut self) -> Result<Option<Command>, RespError> {
        loop {
            let ParseState::InMultibulk {
                expected_args,
                args,
                next_bulk_len,
            } = &mut self.state
            else {
                unreachable!()
            };

            if args.len() as i64 == *expected_args {
                let done = std::mem::take(args);
                self.state = ParseState::Idle;
                return Ok(Some(done));
            }

            match *next_bulk_len {
                None => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    if self.buf[0] != b'$' {
                        return Err(RespError::InvalidType(self.buf[0] as char));
                    }
                    let Some(eol) = self.find_crlf(0) else {
                        return Ok(None);
                    };
                    let line = std::str::from_utf8(&self.buf[1..eol])
                        .map_err(|_| RespError::InvalidBulkLength(-1))?;
                    let len: i64 = line.parse().map_err(|_| RespError::InvalidBulkLength(-1))?;
                    if len < 0 || len > MAX_BULK_LEN {
                        return Err(RespError::InvalidBulkLength(len));
                    }
                    self.buf.drain(..eol + 2);
                    *next_bulk_len = Some(len);
                }
                Some(len) => {
                    let total = len as usize + 2;
                    if self.buf.len() < total {
                        return Ok(None);
                    }
                    let data = self.buf[..len as usize].to_vec();
                    self.buf.drain(..total);
                    args.push(RedisBytes::from(data));
                    *next_bulk_len = None;
                }
            }
        }
    }

    /// Inline commands: a single CRLF-terminated line, space-separated,
    /// with optional single/double quoting (`spec.md` §4.C). Used by simple
    /// clients (e.g. `telnet`) that don't speak multibulk.
    fn try_inline(&mut self) -> Result<Option<Command>, RespError> {
        let Some(eol) = self.find_crlf(0) else {
            if self.buf.len() > MAX_INLINE_LEN {
                return Err(RespError::InlineTooLong);
            }
            return Ok(None);
        };
        let line = self.buf[..eol].to_vec();
        self.buf.drain(..eol + 2);
        let args = split_inline(&line)?;
        Ok(Some(args))
    }
}

/// Splits an inline command line on whitespace, honoring single and double
/// quotes the same way the teacher's `process_inline_buffer` did (minus
/// backslash escapes inside double quotes, which `spec.md` doesn't exercise).
fn split_inline(line: &[u8]) -> Result<Command, RespError> {
    let mut args = Vec::new();
    let mut i = 0;
    let len = line.len();
    while i < len {
        while i < len && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len {
            break;
        }
        if line[i] == b'"' || line[i] == b'\'' {
            let quote = line[i];
            i += 1;
            let start = i;
            while i < len && line[i] != quote {
                i += 1;
            }
            if i >= len {
                return Err(RespError::UnbalancedQuotes);
            }
            args.push(RedisBytes::from(line[start..i].to_vec()));
            i += 1;
        } else {
            let start = i;
            while i < len && !line[i].is_ascii_whitespace() {
                i += 1;
            }
            args.push(RedisBytes::from(line[start..i].to_vec()));
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_multibulk_across_partial_feeds() {
        let mut d = Decoder::new();
        d.feed(b"*2\r\n$3\r\nGET");
        assert_eq!(d.next_command().unwrap(), None);
        d.feed(b"\r\n$1\r\nk\r\n");
        let cmd = d.next_command().unwrap().unwrap();
        assert_eq!(cmd.len(), 2);
        assert_eq!(cmd[0].as_bytes(), b"GET");
        assert_eq!(cmd[1].as_bytes(), b"k");
    }

    #[test]
    fn decodes_inline_with_quotes() {
        let mut d = Decoder::new();
        d.feed(b"SET foo \"bar baz\"\r\n");
        let cmd = d.next_command().unwrap().unwrap();
        assert_eq!(cmd.len(), 3);
        assert_eq!(cmd[2].as_bytes(), b"bar baz");
    }

    #[test]
    fn rejects_oversized_bulk_length() {
        let mut d = Decoder::new();
        d.feed(b"*1\r\n$99999999999\r\n");
        assert!(d.next_command().is_err());
    }

    #[test]
    fn unbalanced_quote_is_an_error() {
        let mut d = Decoder::new();
        d.feed(b"SET foo \"bar\r\n");
        assert!(d.next_command().is_err());
    }

    #[test]
    fn encode_roundtrips_array_of_bulks() {
        let frame = Frame::Array(vec![Frame::bulk("SET"), Frame::bulk("k"), Frame::bulk("v")]);
        let bytes = frame.to_bytes();
        let mut d = Decoder::new();
        d.feed(&bytes);
        let cmd = d.next_command().unwrap().unwrap();
        assert_eq!(cmd[0].as_bytes(), b"SET");
    }
}
