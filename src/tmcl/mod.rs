// TMCL protocol layer
//
// Provides:
// - 9-byte request/reply datagram codec with additive checksum
// - Transport ports (async byte streams, serial devices)
// - Command channel with timeout, reply correlation and FIFO serialization
// - An I/O-free dummy interface with the same contract

mod channel;
pub mod datagram;
mod dummy;
mod error;
pub mod port;

pub use channel::{
    reply_value, CommandChannel, FirmwareVersion, TmclInterface, BANK_ANALOG_IN, BANK_DIGITAL_IN,
    BANK_DIGITAL_OUT,
};
pub use datagram::{encode, Command, Datagram, MoveMode, Reply, Request, Status, FRAME_LEN};
pub use dummy::DummyInterface;
pub use error::{FrameError, Result, TmclError};
pub use port::{Port, SerialTransport, StreamPort};
