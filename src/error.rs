//! Typed errors at the two layer boundaries: the RESP codec and the keyspace store.
//! The command dispatcher (`commands.rs`) is what translates these into wire frames.

/// Errors the keyspace store can report back to a caller.
///
/// `NotFound` is deliberately not a variant here: absence is represented as
/// `Ok(None)` by the store's methods, since a missing key is not an error
/// condition, it's an ordinary result a client needs to branch on.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

/// Errors surfaced while decoding a request frame off the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid multibulk length")]
    InvalidMultibulkLength,
    #[error("invalid multibulk format")]
    InvalidMultibulkFormat,
}

/// Errors the command dispatcher can produce while parsing or validating a request.
/// Each variant corresponds exactly to a row of the client-visible error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command")]
    UnknownCommand,
    #[error("Wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("syntax error")]
    Syntax,
    #[error("Value is not an integer or out of range")]
    InvalidInt,
    #[error(transparent)]
    WrongType(#[from] StoreError),
}
