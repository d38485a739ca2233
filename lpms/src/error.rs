use std::io;

use thiserror::Error;

use crate::device::DeviceMode;

pub type LpmsResult<T> = Result<T, LpmsError>;

#[derive(Error, Debug)]
pub enum LpmsError {
    #[error("Timed out waiting for data")]
    Timeout,
    #[error("Frame is corrupt, transmitted checksum {transmitted:#06x} but computed {computed:#06x}")]
    ChecksumMismatch { transmitted: u16, computed: u16 },
    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("Tried to read {requested} bytes at offset {offset} of a {len} byte payload")]
    ShortRead {
        offset: usize,
        requested: usize,
        len: usize,
    },
    #[error("Buffer holds {provided} bytes but {required} are needed")]
    BufferTooSmall { required: usize, provided: usize },
    #[error("Payload of {0} bytes does not fit in a frame")]
    OversizedPayload(usize),
    #[error("Sensor data frame has {actual} bytes but the configured layout expects {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },
    #[error("Device is not connected")]
    NotConnected,
    #[error("Device is already connected")]
    AlreadyConnected,
    #[error("Cannot transition into {0:?} mode")]
    InvalidModeTransition(DeviceMode),
    #[error("Operation requires {expected:?} mode but device is in {actual:?} mode")]
    WrongMode {
        expected: DeviceMode,
        actual: DeviceMode,
    },
    #[error("Configuration changed since the last refresh")]
    StaleConfiguration,
    #[error("{name} value {value} is out of range")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("Device reported unknown {field} value {value}")]
    UnexpectedValue { field: &'static str, value: u32 },
    #[error("Peer closed connection")]
    PeerClosed,
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Error {0}: Caused by: ({1})")]
    Chain(String, #[source] Box<LpmsError>),
}

impl LpmsError {
    pub fn chain(self, message: String) -> Self {
        LpmsError::Chain(message, Box::new(self))
    }

    /// Errors after which the stream is still usable and the request can be retried
    pub fn is_recoverable(&self) -> bool {
        match self {
            LpmsError::Timeout
            | LpmsError::ChecksumMismatch { .. }
            | LpmsError::MalformedFrame(_) => true,
            LpmsError::Chain(_, source) => source.is_recoverable(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            LpmsError::Timeout => true,
            LpmsError::Chain(_, source) => source.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LpmsError;

    #[test]
    fn chained_errors_keep_their_kind() {
        let err = LpmsError::Timeout.chain("Receive reply".to_owned());
        assert!(err.is_timeout());
        assert!(err.is_recoverable());

        let err = LpmsError::PeerClosed.chain("Receive reply".to_owned());
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Error Receive reply: Caused by: (Peer closed connection)"
        );
    }
}
