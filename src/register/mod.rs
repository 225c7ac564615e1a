// Bit-field access inside 32-bit device registers
//
// Chip registers pack several settings into one word. A `Field` names the bit
// range; `get_field`/`set_field` are the pure extract/insert operations and
// `RegisterAccess` composes them with a device round trip.
//
// Writing a field is a read-modify-write of the whole register. Two writers
// updating different fields of the same register through different channels
// can lose each other's update; route such writes through one channel.

use std::future::Future;

use crate::tmcl::{Result, TmclInterface};

pub mod tmc5130;

/// Location and interpretation of a sub-field inside a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub address: u8,
    pub offset: u8,
    pub width: u8,
    pub signed: bool,
}

impl Field {
    /// Describe a field. Panics (at compile time in const context) if the
    /// bit range does not lie inside 32 bits.
    pub const fn new(address: u8, offset: u8, width: u8, signed: bool) -> Self {
        assert!(offset < 32, "field offset out of range");
        assert!(width >= 1 && width <= 32, "field width out of range");
        assert!(offset as u32 + width as u32 <= 32, "field exceeds register");
        Self {
            address,
            offset,
            width,
            signed,
        }
    }

    pub const fn unsigned(address: u8, offset: u8, width: u8) -> Self {
        Self::new(address, offset, width, false)
    }

    pub const fn signed(address: u8, offset: u8, width: u8) -> Self {
        Self::new(address, offset, width, true)
    }

    /// Mask of the field, already shifted to its position
    pub const fn mask(&self) -> u32 {
        (field_mask(self.width) << self.offset) as u32
    }

    pub fn get(&self, register: u32) -> i64 {
        get_field(register, self.offset, self.width, self.signed)
    }

    pub fn set(&self, register: u32, value: i64) -> u32 {
        set_field(register, self.offset, self.width, value)
    }
}

/// Unshifted mask of `width` bits; computed in 64 bits so that width 32 works
const fn field_mask(width: u8) -> u64 {
    (1u64 << width) - 1
}

fn check_descriptor(offset: u8, width: u8) {
    assert!(
        (1..=32).contains(&width) && offset as u32 + width as u32 <= 32,
        "invalid field descriptor: offset {} width {}",
        offset,
        width
    );
}

/// Extract a field from a register value, sign-extending if `signed`
pub fn get_field(register: u32, offset: u8, width: u8, signed: bool) -> i64 {
    check_descriptor(offset, width);
    let mask = field_mask(width);
    let raw = ((register as u64) >> offset) & mask;

    if signed && raw & (1 << (width - 1)) != 0 {
        raw as i64 - (1i64 << width)
    } else {
        raw as i64
    }
}

/// Insert `value` into a register value. Bits of `value` beyond `width` are
/// dropped, matching how the hardware wraps out-of-range writes.
pub fn set_field(register: u32, offset: u8, width: u8, value: i64) -> u32 {
    check_descriptor(offset, width);
    let mask = field_mask(width);
    let truncated = (value as u64) & mask;
    let cleared = (register as u64) & !(mask << offset);
    (cleared | (truncated << offset)) as u32
}

/// Which TMCL commands reach a board's registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBus {
    /// Motion controller registers (ReadMc/WriteMc)
    MotionController,
    /// Driver registers (ReadDrv/WriteDrv)
    Driver,
}

/// Register-level device access
pub trait RegisterAccess: Sync {
    fn read_register(&self, address: u8) -> impl Future<Output = Result<u32>> + Send;

    fn write_register(&self, address: u8, value: u32) -> impl Future<Output = Result<()>> + Send;

    fn read_field(&self, field: Field) -> impl Future<Output = Result<i64>> + Send {
        async move {
            let register = self.read_register(field.address).await?;
            Ok(field.get(register))
        }
    }

    /// Read-modify-write of the register holding `field`
    fn write_field(&self, field: Field, value: i64) -> impl Future<Output = Result<()>> + Send {
        async move {
            let register = self.read_register(field.address).await?;
            self.write_register(field.address, field.set(register, value))
                .await
        }
    }
}

/// Registers of one module reached through a TMCL interface
pub struct BoardRegisters<'a, I> {
    interface: &'a I,
    module_id: u8,
    bus: RegisterBus,
}

impl<'a, I: TmclInterface> BoardRegisters<'a, I> {
    pub fn new(interface: &'a I, module_id: u8, bus: RegisterBus) -> Self {
        Self {
            interface,
            module_id,
            bus,
        }
    }

    pub fn bus(&self) -> RegisterBus {
        self.bus
    }
}

impl<I: TmclInterface> RegisterAccess for BoardRegisters<'_, I> {
    async fn read_register(&self, address: u8) -> Result<u32> {
        match self.bus {
            RegisterBus::MotionController => self.interface.read_mc(self.module_id, address).await,
            RegisterBus::Driver => self.interface.read_drv(self.module_id, address).await,
        }
    }

    async fn write_register(&self, address: u8, value: u32) -> Result<()> {
        match self.bus {
            RegisterBus::MotionController => {
                self.interface
                    .write_mc(self.module_id, address, value)
                    .await
            }
            RegisterBus::Driver => {
                self.interface
                    .write_drv(self.module_id, address, value)
                    .await
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Register file kept in memory
    #[derive(Default)]
    pub(crate) struct MemoryRegisters {
        pub registers: Mutex<HashMap<u8, u32>>,
        pub writes: Mutex<Vec<(u8, u32)>>,
    }

    impl MemoryRegisters {
        pub fn with(address: u8, value: u32) -> Self {
            let registers = Self::default();
            registers.registers.lock().unwrap().insert(address, value);
            registers
        }

        pub fn value(&self, address: u8) -> u32 {
            *self.registers.lock().unwrap().get(&address).unwrap_or(&0)
        }
    }

    impl RegisterAccess for MemoryRegisters {
        async fn read_register(&self, address: u8) -> Result<u32> {
            Ok(self.value(address))
        }

        async fn write_register(&self, address: u8, value: u32) -> Result<()> {
            self.registers.lock().unwrap().insert(address, value);
            self.writes.lock().unwrap().push((address, value));
            Ok(())
        }
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(get_field(0xFF, 0, 8, true), -1);
        assert_eq!(get_field(0x7F, 0, 8, true), 127);
        assert_eq!(get_field(0x80, 0, 8, true), -128);
        assert_eq!(get_field(0xFF, 0, 8, false), 255);
    }

    #[test]
    fn test_write_truncation() {
        assert_eq!(set_field(0, 0, 4, 0x1F), 0x0F);
        assert_eq!(set_field(0, 4, 4, 0x1F), 0xF0);
    }

    #[test]
    fn test_set_preserves_other_bits() {
        let register = 0xAAAA_AAAA;
        let updated = set_field(register, 8, 8, 0x55);
        assert_eq!(updated, 0xAAAA_55AA);
        assert_eq!(get_field(updated, 8, 8, false), 0x55);
    }

    #[test]
    fn test_full_width_field() {
        assert_eq!(get_field(0xFFFF_FFFF, 0, 32, true), -1);
        assert_eq!(get_field(0xFFFF_FFFF, 0, 32, false), 0xFFFF_FFFF);
        assert_eq!(set_field(0x1234_5678, 0, 32, -2), 0xFFFF_FFFE);
        assert_eq!(get_field(0x8000_0000, 31, 1, false), 1);
        assert_eq!(get_field(0x8000_0000, 31, 1, true), -1);
    }

    #[test]
    fn test_round_trip_all_descriptors() {
        for width in 1u8..=32 {
            for offset in 0u8..=(32 - width) {
                let max_unsigned = (1i64 << width) - 1;
                let min_signed = -(1i64 << (width - 1));
                let max_signed = (1i64 << (width - 1)) - 1;

                for v in [0, 1 & max_unsigned, max_unsigned / 2, max_unsigned] {
                    let register = set_field(0, offset, width, v);
                    assert_eq!(
                        get_field(register, offset, width, false),
                        v,
                        "unsigned width {} offset {}",
                        width,
                        offset
                    );
                }

                for v in [min_signed, -1, 0, max_signed] {
                    let register = set_field(0, offset, width, v);
                    assert_eq!(
                        get_field(register, offset, width, true),
                        v,
                        "signed width {} offset {}",
                        width,
                        offset
                    );
                }
            }
        }
    }

    #[test]
    fn test_field_mask() {
        assert_eq!(Field::unsigned(0, 8, 8).mask(), 0x0000_FF00);
        assert_eq!(Field::unsigned(0, 0, 32).mask(), 0xFFFF_FFFF);
    }

    #[test]
    #[should_panic]
    fn test_field_past_register_end_panics() {
        get_field(0, 30, 4, false);
    }

    #[test]
    #[should_panic]
    fn test_zero_width_panics() {
        set_field(0, 0, 0, 1);
    }

    #[tokio::test]
    async fn test_write_field_is_read_modify_write() {
        let registers = MemoryRegisters::with(0x10, 0x0007_1F0A);
        let irun = Field::unsigned(0x10, 8, 5);

        registers.write_field(irun, 16).await.unwrap();
        assert_eq!(registers.value(0x10), 0x0007_100A);
        assert_eq!(registers.read_field(irun).await.unwrap(), 16);
        assert_eq!(*registers.writes.lock().unwrap(), vec![(0x10, 0x0007_100A)]);
    }

    #[tokio::test]
    async fn test_board_registers_use_selected_bus() {
        use crate::tmcl::{Command, CommandChannel, Port, Reply, FRAME_LEN};
        use std::io;

        /// Answers reads with a fixed register value and records commands
        struct RegisterDevice {
            last: Option<[u8; FRAME_LEN]>,
            commands: std::sync::Arc<Mutex<Vec<(u8, u8)>>>,
        }

        impl Port for RegisterDevice {
            async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
                let frame: [u8; FRAME_LEN] = frame.try_into().map_err(io::Error::other)?;
                self.commands.lock().unwrap().push((frame[1], frame[2]));
                self.last = Some(frame);
                Ok(())
            }

            async fn receive(&mut self, buf: &mut [u8]) -> io::Result<()> {
                let request = self.last.take().ok_or_else(|| io::Error::other("idle"))?;
                let reply = Reply {
                    reply_host_id: 2,
                    module_address: request[0],
                    status: 100,
                    command_echo: request[1],
                    value: 0x0000_0F00,
                };
                buf.copy_from_slice(&reply.encode());
                Ok(())
            }

            async fn close(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let commands = std::sync::Arc::new(Mutex::new(Vec::new()));
        let channel = CommandChannel::new(RegisterDevice {
            last: None,
            commands: commands.clone(),
        });

        let driver = BoardRegisters::new(&channel, 1, RegisterBus::Driver);
        assert_eq!(driver.read_field(Field::unsigned(0x6C, 8, 4)).await.unwrap(), 0xF);
        driver.write_field(Field::unsigned(0x6C, 0, 4), 3).await.unwrap();

        let mc = BoardRegisters::new(&channel, 1, RegisterBus::MotionController);
        mc.read_register(0x21).await.unwrap();

        assert_eq!(
            *commands.lock().unwrap(),
            vec![
                (Command::ReadDrv as u8, 0x6C),
                (Command::ReadDrv as u8, 0x6C),
                (Command::WriteDrv as u8, 0x6C),
                (Command::ReadMc as u8, 0x21),
            ]
        );
    }
}
