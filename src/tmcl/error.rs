// Error types for the TMCL protocol layer
//
// FrameError covers a single 9-byte frame in isolation. TmclError is what a
// command exchange returns and carries the request that was attempted, so a
// failure can be traced to a wiring or firmware mismatch from the message alone.

use std::time::Duration;

use super::datagram::{Request, Status};

/// Errors found while decoding a reply frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed frame: expected 9 bytes, got {len}")]
    MalformedFrame { len: usize },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X} in {frame:02X?}")]
    ChecksumMismatch {
        expected: u8,
        actual: u8,
        frame: Vec<u8>,
    },
}

/// Errors returned by a command exchange
#[derive(Debug, thiserror::Error)]
pub enum TmclError {
    #[error("Cannot encode {field} = {value}: does not fit in one byte")]
    Encoding { field: &'static str, value: i64 },

    #[error("Corrupted reply to {request} on module {module_id}: {source}")]
    Frame {
        request: Request,
        module_id: u8,
        #[source]
        source: FrameError,
    },

    #[error("Timeout after {timeout:?} waiting for reply to {request} from module {module_id}")]
    Timeout {
        request: Request,
        module_id: u8,
        timeout: Duration,
    },

    #[error("Module {module_id} rejected {request}: status {status} ({}) in {frame:02X?}", status_text(.status))]
    Device {
        request: Request,
        module_id: u8,
        status: u8,
        frame: [u8; 9],
    },

    #[error("Reply {frame:02X?} does not belong to {request} (host {host_id}, module {module_id})")]
    UnexpectedReply {
        request: Request,
        host_id: u8,
        module_id: u8,
        frame: [u8; 9],
    },

    #[error("Transport error during {request} on module {module_id}: {source}")]
    Transport {
        request: Request,
        module_id: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel is closed")]
    Closed,
}

impl TmclError {
    /// Status byte reported by the device, if this is a device-level failure
    pub fn device_status(&self) -> Option<u8> {
        match self {
            TmclError::Device { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TmclError::Timeout { .. })
    }
}

fn status_text(status: &u8) -> &'static str {
    Status::describe(*status)
}

pub type Result<T> = std::result::Result<T, TmclError>;
