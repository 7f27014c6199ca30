// error.rs — error types shared by the client and server crates

use thiserror::Error;

/// Failure to assemble a collision model from its parts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollisionError {
    #[error("map with no models")]
    NoModels,
    #[error("map has no leafs")]
    NoLeafs,
    #[error("{kind} {index} references {target} {value} out of range")]
    BadReference {
        kind: &'static str,
        index: usize,
        target: &'static str,
        value: i64,
    },
    #[error("inline model {0} out of range")]
    BadInlineModel(usize),
}

/// Failure while decoding or validating a movement message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MoveError {
    #[error("failed command checksum for sequence {sequence} ({computed} != {received})")]
    ChecksumMismatch {
        sequence: i32,
        computed: u8,
        received: u8,
    },
    #[error("read past end of message")]
    BadRead,
}

/// Failure in the packet layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetchanError {
    #[error("runt packet ({0} bytes)")]
    Runt(usize),
    #[error("out of order packet {sequence} at {incoming}")]
    OutOfOrder { sequence: i32, incoming: i32 },
    #[error("duplicated packet {sequence} at {incoming}")]
    Duplicate { sequence: i32, incoming: i32 },
}
