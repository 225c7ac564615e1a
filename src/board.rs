// Module and evaluation-board façade
//
// Ties a TMCL interface to one module address: its motors, global parameters,
// I/O ports, firmware version and (on evaluation boards) chip registers.

use tracing::info;

use crate::motor::{AxisParameters, MotorAxis};
use crate::register::{BoardRegisters, RegisterBus};
use crate::tmcl::{FirmwareVersion, Result, TmclInterface};

/// One addressed module
pub struct Board<'a, I> {
    interface: &'a I,
    module_id: u8,
    motor_count: usize,
    params: &'static AxisParameters,
    register_bus: Option<RegisterBus>,
}

impl<'a, I: TmclInterface> Board<'a, I> {
    /// A stand-alone module (e.g. TMCM-xxxx) with `motor_count` axes
    pub fn module(
        interface: &'a I,
        module_id: u8,
        motor_count: usize,
        params: &'static AxisParameters,
    ) -> Self {
        Self {
            interface,
            module_id,
            motor_count,
            params,
            register_bus: None,
        }
    }

    /// An evaluation board whose chip registers are reachable over `bus`
    pub fn eval(
        interface: &'a I,
        module_id: u8,
        params: &'static AxisParameters,
        bus: RegisterBus,
    ) -> Self {
        Self {
            interface,
            module_id,
            motor_count: 1,
            params,
            register_bus: Some(bus),
        }
    }

    pub fn module_id(&self) -> u8 {
        self.module_id
    }

    pub fn interface(&self) -> &'a I {
        self.interface
    }

    pub fn motor_count(&self) -> usize {
        self.motor_count
    }

    /// Axis `index`; indices past `motor_count` are still sent as requested
    pub fn motor(&self, index: usize) -> Result<MotorAxis<'a, I>> {
        MotorAxis::new(self.interface, self.module_id, index, self.params)
    }

    pub fn motors(&self) -> Result<Vec<MotorAxis<'a, I>>> {
        (0..self.motor_count).map(|i| self.motor(i)).collect()
    }

    /// Chip registers, for evaluation boards
    pub fn registers(&self) -> Option<BoardRegisters<'a, I>> {
        self.register_bus
            .map(|bus| BoardRegisters::new(self.interface, self.module_id, bus))
    }

    pub async fn firmware_version(&self) -> Result<FirmwareVersion> {
        let version = self.interface.get_firmware_version(self.module_id).await?;
        info!("Module {} firmware {}", self.module_id, version);
        Ok(version)
    }

    pub async fn set_global_parameter(&self, parameter: u8, bank: u8, value: i32) -> Result<()> {
        self.interface
            .set_global_parameter(self.module_id, parameter, bank, value)
            .await
    }

    pub async fn get_global_parameter(&self, parameter: u8, bank: u8, signed: bool) -> Result<i64> {
        self.interface
            .get_global_parameter(self.module_id, parameter, bank, signed)
            .await
    }

    pub async fn digital_input(&self, port: u8) -> Result<bool> {
        self.interface.get_digital_input(self.module_id, port).await
    }

    pub async fn analog_input(&self, port: u8) -> Result<i32> {
        self.interface.get_analog_input(self.module_id, port).await
    }

    pub async fn set_digital_output(&self, port: u8, high: bool) -> Result<()> {
        self.interface
            .set_digital_output(self.module_id, port, high)
            .await
    }
}
