// Per-axis motor control over TMCL
//
// One implementation serves every device family: what differs between chips
// is only the axis-parameter table handed in at construction.

use std::future::Future;

use tracing::{debug, info};

use super::params::AxisParameters;
use crate::tmcl::{Result, TmclError, TmclInterface};

/// Motion and parameter capability of one motor axis
pub trait AxisControl: Sync {
    /// Rotate at `velocity`; the sign selects the direction
    fn rotate(&self, velocity: i32) -> impl Future<Output = Result<()>> + Send;

    fn stop(&self) -> impl Future<Output = Result<()>> + Send;

    /// Move to an absolute position, optionally changing the maximum velocity first
    fn move_to(&self, position: i32, velocity: Option<i32>) -> impl Future<Output = Result<()>> + Send;

    /// Move relative to the current position
    fn move_by(&self, difference: i32, velocity: Option<i32>) -> impl Future<Output = Result<()>> + Send;

    fn set_parameter(&self, parameter: u8, value: i32) -> impl Future<Output = Result<()>> + Send;

    fn get_parameter(&self, parameter: u8, signed: bool) -> impl Future<Output = Result<i64>> + Send;
}

/// One axis of one module
pub struct MotorAxis<'a, I> {
    interface: &'a I,
    module_id: u8,
    axis: u8,
    params: &'static AxisParameters,
}

impl<'a, I: TmclInterface> MotorAxis<'a, I> {
    /// Address axis number `axis` of module `module_id`
    ///
    /// Fails if the axis index does not fit the one-byte motor field.
    pub fn new(
        interface: &'a I,
        module_id: u8,
        axis: usize,
        params: &'static AxisParameters,
    ) -> Result<Self> {
        let axis = u8::try_from(axis).map_err(|_| TmclError::Encoding {
            field: "motor",
            value: axis as i64,
        })?;
        Ok(Self {
            interface,
            module_id,
            axis,
            params,
        })
    }

    pub fn axis(&self) -> u8 {
        self.axis
    }

    pub fn module_id(&self) -> u8 {
        self.module_id
    }

    pub fn params(&self) -> &'static AxisParameters {
        self.params
    }

    /// Read an optional parameter; None if this device family has no such parameter
    async fn get_optional(&self, parameter: Option<u8>) -> Result<Option<i64>> {
        match parameter {
            Some(parameter) => Ok(Some(self.get_parameter(parameter, false).await?)),
            None => Ok(None),
        }
    }

    async fn set_max_velocity_if_given(&self, velocity: Option<i32>) -> Result<()> {
        match velocity {
            Some(velocity) if velocity != 0 => self.set_max_velocity(velocity).await,
            _ => Ok(()),
        }
    }

    // === Position ===

    pub async fn target_position(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.target_position, true).await? as i32)
    }

    pub async fn set_target_position(&self, position: i32) -> Result<()> {
        self.set_parameter(self.params.target_position, position).await
    }

    pub async fn actual_position(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.actual_position, true).await? as i32)
    }

    /// Redefine the current position (e.g. zero it after homing)
    pub async fn set_actual_position(&self, position: i32) -> Result<()> {
        self.set_parameter(self.params.actual_position, position).await
    }

    pub async fn position_reached(&self) -> Result<bool> {
        Ok(self.get_parameter(self.params.position_reached, false).await? != 0)
    }

    // === Velocity ===

    pub async fn target_velocity(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.target_velocity, true).await? as i32)
    }

    pub async fn set_target_velocity(&self, velocity: i32) -> Result<()> {
        self.set_parameter(self.params.target_velocity, velocity).await
    }

    pub async fn actual_velocity(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.actual_velocity, true).await? as i32)
    }

    pub async fn max_velocity(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.max_velocity, false).await? as i32)
    }

    pub async fn set_max_velocity(&self, velocity: i32) -> Result<()> {
        self.set_parameter(self.params.max_velocity, velocity).await
    }

    pub async fn max_acceleration(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.max_acceleration, false).await? as i32)
    }

    pub async fn set_max_acceleration(&self, acceleration: i32) -> Result<()> {
        self.set_parameter(self.params.max_acceleration, acceleration)
            .await
    }

    // === Current ===

    pub async fn run_current(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.run_current, false).await? as i32)
    }

    pub async fn set_run_current(&self, current: i32) -> Result<()> {
        self.set_parameter(self.params.run_current, current).await
    }

    pub async fn standby_current(&self) -> Result<i32> {
        Ok(self.get_parameter(self.params.standby_current, false).await? as i32)
    }

    pub async fn set_standby_current(&self, current: i32) -> Result<()> {
        self.set_parameter(self.params.standby_current, current).await
    }

    // === Driver settings and flags ===

    pub async fn microstep_resolution(&self) -> Result<Option<i64>> {
        self.get_optional(self.params.microstep_resolution).await
    }

    pub async fn status_flags(&self) -> Result<Option<u32>> {
        Ok(self
            .get_optional(self.params.status_flags)
            .await?
            .map(|flags| flags as u32))
    }

    pub async fn error_flags(&self) -> Result<Option<u32>> {
        Ok(self
            .get_optional(self.params.error_flags)
            .await?
            .map(|flags| flags as u32))
    }

    /// Persist an axis parameter in the module's EEPROM
    pub async fn store_parameter(&self, parameter: u8) -> Result<()> {
        info!(
            "Storing parameter {} of axis {} on module {}",
            parameter, self.axis, self.module_id
        );
        self.interface
            .store_axis_parameter(self.module_id, parameter, self.axis)
            .await
    }
}

impl<I: TmclInterface> AxisControl for MotorAxis<'_, I> {
    async fn rotate(&self, velocity: i32) -> Result<()> {
        debug!("Axis {}: rotate at {}", self.axis, velocity);
        self.interface
            .rotate(self.module_id, self.axis, velocity)
            .await
    }

    async fn stop(&self) -> Result<()> {
        debug!("Axis {}: stop", self.axis);
        self.interface.stop(self.module_id, self.axis).await
    }

    async fn move_to(&self, position: i32, velocity: Option<i32>) -> Result<()> {
        self.set_max_velocity_if_given(velocity).await?;
        debug!("Axis {}: move to {}", self.axis, position);
        self.interface
            .move_to(self.module_id, self.axis, position)
            .await
    }

    async fn move_by(&self, difference: i32, velocity: Option<i32>) -> Result<()> {
        self.set_max_velocity_if_given(velocity).await?;
        debug!("Axis {}: move by {}", self.axis, difference);
        self.interface
            .move_by(self.module_id, self.axis, difference)
            .await
    }

    async fn set_parameter(&self, parameter: u8, value: i32) -> Result<()> {
        self.interface
            .set_axis_parameter(self.module_id, parameter, self.axis, value)
            .await
    }

    async fn get_parameter(&self, parameter: u8, signed: bool) -> Result<i64> {
        self.interface
            .get_axis_parameter(self.module_id, parameter, self.axis, signed)
            .await
    }
}
