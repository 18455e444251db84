//! Typed error enums for each subsystem, converted to RESP error replies at
//! the dispatch boundary. No handler lets an error escape its own scope.

use thiserror::Error;

/// Error raised while decoding or encoding a RESP frame.
#[derive(Debug, Error)]
pub enum RespError {
    #[error("protocol error: invalid frame type byte '{0}'")]
    InvalidType(char),
    #[error("protocol error: invalid bulk length {0}")]
    InvalidBulkLength(i64),
    #[error("protocol error: invalid multibulk length {0}")]
    InvalidArrayLength(i64),
    #[error("protocol error: inline command too long")]
    InlineTooLong,
    #[error("protocol error: unbalanced quotes in inline request")]
    UnbalancedQuotes,
    #[error("unexpected end of input")]
    Incomplete,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised while executing a command against the keyspace.
///
/// This is the error type handlers return; the dispatcher maps every variant
/// to the RESP error reply the client actually sees.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR value is not a valid float")]
    NotAFloat,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR index out of range")]
    OutOfRange,
    #[error("ERR no such key")]
    NoSuchKey,
    #[error("ERR {0}")]
    Other(String),
    #[error("ERR not leader")]
    NotLeader,
    #[error("ERR already in progress")]
    AlreadyInProgress,
    #[error("ERR DB index is out of range")]
    BadDbIndex,
}

impl CommandError {
    /// The bytes of the `-...\r\n` RESP error line for this error.
    pub fn to_resp_line(&self) -> String {
        format!("{}", self)
    }
}

#[derive(Debug, Error)]
pub enum AofError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed AOF frame: {0}")]
    Malformed(String),
    #[error("unknown command '{0}' replaying append-only file")]
    UnknownCommand(String),
}

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wrong signature trying to load DB from file")]
    BadMagic,
    #[error("checksum mismatch: expected {expected:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { expected: u64, computed: u64 },
    #[error("unknown RDB value type byte {0}")]
    UnknownType(u8),
    #[error("malformed RDB stream: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad PSYNC handshake: {0}")]
    BadHandshake(String),
    #[error("offset {requested} outside backlog window [{oldest}, {newest}]")]
    OffsetOutsideBacklog {
        requested: u64,
        oldest: u64,
        newest: u64,
    },
}

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not leader")]
    NotLeader,
    #[error("stale term {given}, current term is {current}")]
    StaleTerm { given: u64, current: u64 },
    #[error("malformed log entry: {0}")]
    MalformedEntry(String),
}
