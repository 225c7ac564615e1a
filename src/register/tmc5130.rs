// TMC5130 register map (subset) and typed accessors
//
// Addresses and bit positions from the TMC5130 datasheet. The tables are plain
// constants; `Tmc5130` wraps any register backend with named getters/setters.

use super::{Field, RegisterAccess};
use crate::tmcl::Result;

/// Register addresses
pub mod reg {
    pub const GCONF: u8 = 0x00;
    pub const GSTAT: u8 = 0x01;
    pub const IHOLD_IRUN: u8 = 0x10;
    pub const TPOWERDOWN: u8 = 0x11;
    pub const TSTEP: u8 = 0x12;
    pub const RAMPMODE: u8 = 0x20;
    pub const XACTUAL: u8 = 0x21;
    pub const VACTUAL: u8 = 0x22;
    pub const VSTART: u8 = 0x23;
    pub const A1: u8 = 0x24;
    pub const V1: u8 = 0x25;
    pub const AMAX: u8 = 0x26;
    pub const VMAX: u8 = 0x27;
    pub const DMAX: u8 = 0x28;
    pub const D1: u8 = 0x2A;
    pub const VSTOP: u8 = 0x2B;
    pub const XTARGET: u8 = 0x2D;
    pub const SW_MODE: u8 = 0x34;
    pub const RAMP_STAT: u8 = 0x35;
    pub const MSLUT: [u8; 8] = [0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67];
    pub const MSLUTSEL: u8 = 0x68;
    pub const MSLUTSTART: u8 = 0x69;
    pub const MSCNT: u8 = 0x6A;
    pub const MSCURACT: u8 = 0x6B;
    pub const CHOPCONF: u8 = 0x6C;
    pub const COOLCONF: u8 = 0x6D;
    pub const DRV_STATUS: u8 = 0x6F;
}

/// Bit fields
pub mod field {
    use super::reg;
    use crate::register::Field;

    pub const EN_PWM_MODE: Field = Field::unsigned(reg::GCONF, 2, 1);
    pub const SHAFT: Field = Field::unsigned(reg::GCONF, 4, 1);

    pub const RESET: Field = Field::unsigned(reg::GSTAT, 0, 1);
    pub const DRV_ERR: Field = Field::unsigned(reg::GSTAT, 1, 1);

    pub const IHOLD: Field = Field::unsigned(reg::IHOLD_IRUN, 0, 5);
    pub const IRUN: Field = Field::unsigned(reg::IHOLD_IRUN, 8, 5);
    pub const IHOLDDELAY: Field = Field::unsigned(reg::IHOLD_IRUN, 16, 4);

    pub const XACTUAL: Field = Field::signed(reg::XACTUAL, 0, 32);
    pub const VACTUAL: Field = Field::signed(reg::VACTUAL, 0, 24);

    pub const POSITION_REACHED: Field = Field::unsigned(reg::RAMP_STAT, 9, 1);
    pub const VELOCITY_REACHED: Field = Field::unsigned(reg::RAMP_STAT, 8, 1);

    pub const W0: Field = Field::unsigned(reg::MSLUTSEL, 0, 2);
    pub const W1: Field = Field::unsigned(reg::MSLUTSEL, 2, 2);
    pub const W2: Field = Field::unsigned(reg::MSLUTSEL, 4, 2);
    pub const W3: Field = Field::unsigned(reg::MSLUTSEL, 6, 2);
    pub const X1: Field = Field::unsigned(reg::MSLUTSEL, 8, 8);
    pub const X2: Field = Field::unsigned(reg::MSLUTSEL, 16, 8);
    pub const X3: Field = Field::unsigned(reg::MSLUTSEL, 24, 8);

    pub const START_SIN: Field = Field::unsigned(reg::MSLUTSTART, 0, 8);
    pub const START_SIN90: Field = Field::unsigned(reg::MSLUTSTART, 16, 8);

    pub const MSCNT: Field = Field::unsigned(reg::MSCNT, 0, 10);
    pub const CUR_A: Field = Field::signed(reg::MSCURACT, 0, 9);
    pub const CUR_B: Field = Field::signed(reg::MSCURACT, 16, 9);

    pub const TOFF: Field = Field::unsigned(reg::CHOPCONF, 0, 4);
    pub const HSTRT: Field = Field::unsigned(reg::CHOPCONF, 4, 3);
    pub const HEND: Field = Field::unsigned(reg::CHOPCONF, 7, 4);
    pub const TBL: Field = Field::unsigned(reg::CHOPCONF, 15, 2);
    pub const MRES: Field = Field::unsigned(reg::CHOPCONF, 24, 4);

    pub const SEMIN: Field = Field::unsigned(reg::COOLCONF, 0, 4);
    pub const SEMAX: Field = Field::unsigned(reg::COOLCONF, 8, 4);
    pub const SGT: Field = Field::signed(reg::COOLCONF, 16, 7);
    pub const SFILT: Field = Field::unsigned(reg::COOLCONF, 24, 1);

    pub const SG_RESULT: Field = Field::unsigned(reg::DRV_STATUS, 0, 10);
    pub const CS_ACTUAL: Field = Field::unsigned(reg::DRV_STATUS, 16, 5);
    pub const STALLGUARD: Field = Field::unsigned(reg::DRV_STATUS, 24, 1);
    pub const OT: Field = Field::unsigned(reg::DRV_STATUS, 25, 1);
    pub const STST: Field = Field::unsigned(reg::DRV_STATUS, 31, 1);
}

/// Microstep resolutions selectable through CHOPCONF.MRES
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrostepResolution {
    Full = 8,
    Half = 7,
    Quarter = 6,
    Eighth = 5,
    Sixteenth = 4,
    ThirtySecond = 3,
    SixtyFourth = 2,
    OneTwentyEighth = 1,
    TwoFiftySixth = 0,
}

impl MicrostepResolution {
    pub fn from_mres(mres: i64) -> Option<Self> {
        Some(match mres {
            0 => Self::TwoFiftySixth,
            1 => Self::OneTwentyEighth,
            2 => Self::SixtyFourth,
            3 => Self::ThirtySecond,
            4 => Self::Sixteenth,
            5 => Self::Eighth,
            6 => Self::Quarter,
            7 => Self::Half,
            8 => Self::Full,
            _ => return None,
        })
    }

    /// Microsteps per full step
    pub fn microsteps(self) -> u32 {
        256 >> (self as u32)
    }
}

/// Named access to a TMC5130 behind any register backend
pub struct Tmc5130<R> {
    registers: R,
}

impl<R: RegisterAccess> Tmc5130<R> {
    pub fn new(registers: R) -> Self {
        Self { registers }
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    pub async fn run_current(&self) -> Result<u8> {
        Ok(self.registers.read_field(field::IRUN).await? as u8)
    }

    /// Run current scale 0..=31; larger values wrap like the hardware does
    pub async fn set_run_current(&self, value: u8) -> Result<()> {
        self.registers.write_field(field::IRUN, value as i64).await
    }

    pub async fn hold_current(&self) -> Result<u8> {
        Ok(self.registers.read_field(field::IHOLD).await? as u8)
    }

    pub async fn set_hold_current(&self, value: u8) -> Result<()> {
        self.registers.write_field(field::IHOLD, value as i64).await
    }

    /// None if MRES holds a reserved value
    pub async fn microstep_resolution(&self) -> Result<Option<MicrostepResolution>> {
        let mres = self.registers.read_field(field::MRES).await?;
        Ok(MicrostepResolution::from_mres(mres))
    }

    pub async fn set_microstep_resolution(&self, resolution: MicrostepResolution) -> Result<()> {
        self.registers
            .write_field(field::MRES, resolution as i64)
            .await
    }

    /// StallGuard2 threshold, -64..=63
    pub async fn stallguard_threshold(&self) -> Result<i8> {
        Ok(self.registers.read_field(field::SGT).await? as i8)
    }

    pub async fn set_stallguard_threshold(&self, value: i8) -> Result<()> {
        self.registers.write_field(field::SGT, value as i64).await
    }

    pub async fn stallguard_result(&self) -> Result<u16> {
        Ok(self.registers.read_field(field::SG_RESULT).await? as u16)
    }

    pub async fn actual_position(&self) -> Result<i32> {
        Ok(self.registers.read_field(field::XACTUAL).await? as i32)
    }

    pub async fn actual_velocity(&self) -> Result<i32> {
        Ok(self.registers.read_field(field::VACTUAL).await? as i32)
    }

    pub async fn position_reached(&self) -> Result<bool> {
        Ok(self.registers.read_field(field::POSITION_REACHED).await? != 0)
    }

    /// Microstep counter and the two coil currents it selects
    pub async fn microstep_currents(&self) -> Result<(u16, i16, i16)> {
        let count = self.registers.read_field(field::MSCNT).await? as u16;
        let currents = self.registers.read_register(reg::MSCURACT).await?;
        Ok((
            count,
            field::CUR_A.get(currents) as i16,
            field::CUR_B.get(currents) as i16,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::tests::MemoryRegisters;

    #[test]
    fn test_fields_fit_their_registers() {
        for f in [
            field::IRUN,
            field::X3,
            field::CUR_B,
            field::MRES,
            field::SGT,
            field::STST,
            field::XACTUAL,
        ] {
            assert!(f.offset as u32 + f.width as u32 <= 32);
        }
        assert_eq!(field::IRUN.mask(), 0x0000_1F00);
        assert_eq!(field::MRES.mask(), 0x0F00_0000);
    }

    #[test]
    fn test_microstep_resolution() {
        assert_eq!(MicrostepResolution::TwoFiftySixth.microsteps(), 256);
        assert_eq!(MicrostepResolution::Sixteenth.microsteps(), 16);
        assert_eq!(MicrostepResolution::Full.microsteps(), 1);
        assert_eq!(MicrostepResolution::from_mres(9), None);
    }

    #[tokio::test]
    async fn test_currents_are_sign_extended() {
        // CUR_A = -248 (0x108 in 9 bits), CUR_B = 247
        let registers = MemoryRegisters::with(reg::MSCURACT, (247 << 16) | 0x108);
        registers
            .registers
            .lock()
            .unwrap()
            .insert(reg::MSCNT, 512);
        let chip = Tmc5130::new(registers);

        assert_eq!(chip.microstep_currents().await.unwrap(), (512, -248, 247));
    }

    #[tokio::test]
    async fn test_run_current_keeps_hold_current() {
        let chip = Tmc5130::new(MemoryRegisters::with(reg::IHOLD_IRUN, 0x0006_1008));

        chip.set_run_current(20).await.unwrap();
        assert_eq!(chip.run_current().await.unwrap(), 20);
        assert_eq!(chip.hold_current().await.unwrap(), 8);
        assert_eq!(chip.registers().value(reg::IHOLD_IRUN), 0x0006_1408);

        // 33 does not fit 5 bits and wraps to 1
        chip.set_run_current(33).await.unwrap();
        assert_eq!(chip.run_current().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stallguard_threshold_round_trip() {
        let chip = Tmc5130::new(MemoryRegisters::with(reg::COOLCONF, 0x0100_0000));

        chip.set_stallguard_threshold(-5).await.unwrap();
        assert_eq!(chip.stallguard_threshold().await.unwrap(), -5);
        // SFILT untouched
        assert_eq!(chip.registers().value(reg::COOLCONF) & 0x0100_0000, 0x0100_0000);
    }

    #[tokio::test]
    async fn test_velocity_and_microsteps() {
        let registers = MemoryRegisters::with(reg::VACTUAL, 0x00FF_FFF6);
        registers
            .registers
            .lock()
            .unwrap()
            .insert(reg::CHOPCONF, 0x0400_0000);
        let chip = Tmc5130::new(registers);

        assert_eq!(chip.actual_velocity().await.unwrap(), -10);
        assert_eq!(
            chip.microstep_resolution().await.unwrap(),
            Some(MicrostepResolution::Sixteenth)
        );

        chip.set_microstep_resolution(MicrostepResolution::TwoFiftySixth)
            .await
            .unwrap();
        assert_eq!(chip.registers().value(reg::CHOPCONF), 0);
    }
}
