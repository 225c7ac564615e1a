// Host-side driver for TMCL motor-controller modules
//
// Layers, bottom up:
// - tmcl: datagram codec, transport ports, command channel
// - register: bit-field access inside chip registers
// - motor: per-axis control façade
// - board: module-level façade tying the above to one module address

pub mod board;
pub mod config;
pub mod motor;
pub mod register;
pub mod tmcl;

pub use board::Board;
pub use tmcl::{CommandChannel, DummyInterface, TmclError, TmclInterface};
