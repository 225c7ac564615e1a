// TMCL datagram codec
//
// Request and reply frames are both exactly 9 bytes:
//   request: [module_id, command, type, motor_or_bank, value(4, BE), checksum]
//   reply:   [reply_host_id, module_address, status, command_echo, value(4, BE), checksum]
// Checksum is the sum of the first 8 bytes modulo 256.
//
// The host id is not part of the request bytes. The module answers with it in
// the first reply byte, which is what ties a reply back to its sender.

use std::fmt;

use serde::Serialize;

use super::error::{FrameError, Result, TmclError};

/// Length of every request and reply frame
pub const FRAME_LEN: usize = 9;

/// TMCL command numbers used by this crate
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RotateRight = 1,
    RotateLeft = 2,
    MotorStop = 3,
    MoveToPosition = 4,
    SetAxisParameter = 5,
    GetAxisParameter = 6,
    StoreAxisParameter = 7,
    RestoreAxisParameter = 8,
    SetGlobalParameter = 9,
    GetGlobalParameter = 10,
    SetOutput = 14,
    GetInput = 15,
    GetFirmwareVersion = 136,
    WriteMc = 146,
    ReadMc = 147,
    WriteDrv = 148,
    ReadDrv = 149,
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

/// Type byte of a MVP (move to position) command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    Absolute = 0,
    Relative = 1,
}

/// Reply status codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    WrongChecksum = 1,
    InvalidCommand = 2,
    WrongType = 3,
    InvalidValue = 4,
    ConfigurationEepromLocked = 5,
    CommandNotAvailable = 6,
    Success = 100,
    CommandLoaded = 101,
}

impl Status {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Status::WrongChecksum),
            2 => Some(Status::InvalidCommand),
            3 => Some(Status::WrongType),
            4 => Some(Status::InvalidValue),
            5 => Some(Status::ConfigurationEepromLocked),
            6 => Some(Status::CommandNotAvailable),
            100 => Some(Status::Success),
            101 => Some(Status::CommandLoaded),
            _ => None,
        }
    }

    /// True for the two codes a module sends when it accepted a command
    pub fn is_success(code: u8) -> bool {
        matches!(
            Self::from_u8(code),
            Some(Status::Success | Status::CommandLoaded)
        )
    }

    pub fn describe(code: u8) -> &'static str {
        match Self::from_u8(code) {
            Some(Status::WrongChecksum) => "wrong checksum",
            Some(Status::InvalidCommand) => "invalid command",
            Some(Status::WrongType) => "wrong type",
            Some(Status::InvalidValue) => "invalid value",
            Some(Status::ConfigurationEepromLocked) => "configuration EEPROM locked",
            Some(Status::CommandNotAvailable) => "command not available",
            Some(Status::Success) => "success",
            Some(Status::CommandLoaded) => "command loaded",
            None => "unknown status",
        }
    }
}

/// Checksum over a frame prefix
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// An unaddressed command: what to do, on which motor/bank, with which value.
///
/// The channel fills in host and module addresses when it sends the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Request {
    pub command: u8,
    /// The TMCL "type" byte (parameter number, move mode, port, register address...)
    pub kind: u8,
    pub motor_or_bank: u8,
    pub value: i32,
}

impl Request {
    pub fn new(command: impl Into<u8>, kind: u8, motor_or_bank: u8, value: i32) -> Self {
        Self {
            command: command.into(),
            kind,
            motor_or_bank,
            value,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command {} (type {}, motor/bank {}, value {})",
            self.command, self.kind, self.motor_or_bank, self.value
        )
    }
}

/// A fully addressed request datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    pub host_id: u8,
    pub module_id: u8,
    pub request: Request,
}

impl Datagram {
    pub fn new(host_id: u8, module_id: u8, request: Request) -> Self {
        Self {
            host_id,
            module_id,
            request,
        }
    }

    /// Build the 9-byte frame with trailing checksum
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let value = self.request.value.to_be_bytes();
        let mut frame = [
            self.module_id,
            self.request.command,
            self.request.kind,
            self.request.motor_or_bank,
            value[0],
            value[1],
            value[2],
            value[3],
            0,
        ];
        frame[8] = checksum(&frame[..8]);
        frame
    }

    /// True if `reply` answers this request: same command, sent by the
    /// addressed module back to this host
    pub fn matches(&self, reply: &Reply) -> bool {
        reply.reply_host_id == self.host_id
            && reply.module_address == self.module_id
            && reply.command_echo == self.request.command
    }
}

/// Encode a request from plain integers.
///
/// `value` is reinterpreted as 32-bit two's complement, so both `-1` and
/// `0xFFFF_FFFF` produce `FF FF FF FF`. The remaining fields must fit in a byte.
pub fn encode(
    host_id: u32,
    module_id: u32,
    command: u32,
    kind: u32,
    motor_or_bank: u32,
    value: i64,
) -> Result<[u8; FRAME_LEN]> {
    let byte = |field: &'static str, v: u32| {
        u8::try_from(v).map_err(|_| TmclError::Encoding {
            field,
            value: v as i64,
        })
    };

    let datagram = Datagram::new(
        byte("host_id", host_id)?,
        byte("module_id", module_id)?,
        Request::new(
            byte("command", command)?,
            byte("type", kind)?,
            byte("motor_or_bank", motor_or_bank)?,
            value as i32,
        ),
    );
    Ok(datagram.encode())
}

/// A decoded reply frame. The status byte is kept raw; interpreting it is up
/// to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// Byte 0: the host the reply is addressed to
    pub reply_host_id: u8,
    /// Byte 1: the module that answered
    pub module_address: u8,
    pub status: u8,
    pub command_echo: u8,
    pub value: i32,
}

impl Reply {
    /// Decode and validate a reply frame
    pub fn decode(frame: &[u8]) -> std::result::Result<Self, FrameError> {
        let frame: &[u8; FRAME_LEN] = frame
            .try_into()
            .map_err(|_| FrameError::MalformedFrame { len: frame.len() })?;

        let expected = checksum(&frame[..8]);
        if expected != frame[8] {
            return Err(FrameError::ChecksumMismatch {
                expected,
                actual: frame[8],
                frame: frame.to_vec(),
            });
        }

        Ok(Self {
            reply_host_id: frame[0],
            module_address: frame[1],
            status: frame[2],
            command_echo: frame[3],
            value: i32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]),
        })
    }

    /// Re-encode into the 9-byte wire form
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let value = self.value.to_be_bytes();
        let mut frame = [
            self.reply_host_id,
            self.module_address,
            self.status,
            self.command_echo,
            value[0],
            value[1],
            value[2],
            value[3],
            0,
        ];
        frame[8] = checksum(&frame[..8]);
        frame
    }

    /// The value bits read as unsigned
    pub fn unsigned_value(&self) -> u32 {
        self.value as u32
    }

    pub fn is_success(&self) -> bool {
        Status::is_success(self.status)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reply to command {} from module {}: {} ({}), value {}",
            self.command_echo,
            self.module_address,
            self.status,
            Status::describe(self.status),
            self.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_get_axis_parameter() {
        let frame = encode(2, 1, 6, 1, 0, 0).unwrap();
        // Host id 2 is not sent: it only comes back in byte 0 of the reply
        // module 1, GAP, type 1, motor 0, value 0, checksum 1+6+1 = 8
        assert_eq!(frame, [0x01, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(frame.len(), FRAME_LEN);
    }

    #[test]
    fn test_datagram_matches_reply() {
        let datagram = Datagram::new(2, 1, Request::new(Command::GetAxisParameter, 1, 0, 0));
        let mut reply = Reply {
            reply_host_id: 2,
            module_address: 1,
            status: 100,
            command_echo: 6,
            value: 0,
        };
        assert!(datagram.matches(&reply));

        reply.module_address = 3;
        assert!(!datagram.matches(&reply));

        reply.module_address = 1;
        reply.command_echo = 5;
        assert!(!datagram.matches(&reply));
    }

    #[test]
    fn test_decode_reply() {
        let reply = Reply::decode(&[0x01, 0x02, 0x00, 0x06, 0x00, 0x00, 0x03, 0xE8, 0xF4]).unwrap();
        assert_eq!(reply.status, 0);
        assert_eq!(reply.command_echo, 6);
        assert_eq!(reply.value, 1000);
        assert_eq!(reply.reply_host_id, 1);
        assert_eq!(reply.module_address, 2);
    }

    #[test]
    fn test_value_is_big_endian_twos_complement() {
        let negative = encode(2, 1, 5, 0, 0, -2).unwrap();
        assert_eq!(&negative[4..8], &[0xFF, 0xFF, 0xFF, 0xFE]);

        // Unsigned bit patterns wrap to the same encoding
        let unsigned = encode(2, 1, 5, 0, 0, 0xFFFF_FFFE).unwrap();
        assert_eq!(negative, unsigned);

        let positive = encode(2, 1, 5, 0, 0, 0x1234_5678).unwrap();
        assert_eq!(&positive[4..8], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_encode_rejects_wide_fields() {
        match encode(2, 256, 6, 1, 0, 0) {
            Err(TmclError::Encoding { field, value }) => {
                assert_eq!(field, "module_id");
                assert_eq!(value, 256);
            }
            other => panic!("expected encoding error, got {:?}", other),
        }
        assert!(matches!(
            encode(2, 1, 6, 1, 300, 0),
            Err(TmclError::Encoding { field: "motor_or_bank", .. })
        ));
    }

    #[test]
    fn test_checksum_round_trip() {
        let prefixes: [[u8; 8]; 4] = [
            [0, 0, 0, 0, 0, 0, 0, 0],
            [2, 1, 6, 1, 0, 0, 0, 0],
            [0xFF; 8],
            [1, 2, 100, 5, 0x80, 0x00, 0x7F, 0x01],
        ];
        for prefix in prefixes {
            let mut frame = [0u8; FRAME_LEN];
            frame[..8].copy_from_slice(&prefix);
            frame[8] = checksum(&prefix);
            let reply = Reply::decode(&frame).unwrap();
            assert_eq!(reply.encode(), frame);
        }
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let frame = [0x01, 0x02, 0x64, 0x06, 0x00, 0x00, 0x03, 0xE8, 0];
        let mut frame = frame;
        frame[8] = checksum(&frame[..8]);

        // A single flipped bit changes the byte sum by a power of two below 256,
        // which can never be a multiple of 256.
        for byte in 0..FRAME_LEN {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        Reply::decode(&corrupted),
                        Err(FrameError::ChecksumMismatch { .. })
                    ),
                    "flip of byte {} bit {} not detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_malformed_length() {
        assert_eq!(
            Reply::decode(&[0u8; 8]),
            Err(FrameError::MalformedFrame { len: 8 })
        );
        assert_eq!(
            Reply::decode(&[0u8; 10]),
            Err(FrameError::MalformedFrame { len: 10 })
        );
    }

    #[test]
    fn test_checksum_mismatch_reports_bytes() {
        let err = Reply::decode(&[0x01, 0x02, 0x00, 0x06, 0x00, 0x00, 0x03, 0xE8, 0x00]).unwrap_err();
        assert_eq!(
            err,
            FrameError::ChecksumMismatch {
                expected: 0xF4,
                actual: 0x00,
                frame: vec![0x01, 0x02, 0x00, 0x06, 0x00, 0x00, 0x03, 0xE8, 0x00],
            }
        );
    }

    #[test]
    fn test_status_codes() {
        assert!(Status::is_success(100));
        assert!(Status::is_success(101));
        assert!(!Status::is_success(0));
        assert!(!Status::is_success(4));
        assert_eq!(Status::from_u8(2), Some(Status::InvalidCommand));
        assert_eq!(Status::describe(42), "unknown status");
    }

    #[test]
    fn test_unsigned_value() {
        let reply = Reply {
            reply_host_id: 1,
            module_address: 2,
            status: 100,
            command_echo: 6,
            value: -1,
        };
        assert_eq!(reply.unsigned_value(), 0xFFFF_FFFF);
    }
}
