// Axis parameter numbers per device family
//
// Each table maps the named settings of one axis to TMCL axis-parameter type
// numbers. Tables are static data injected into `MotorAxis`.

/// Axis parameter numbers for one device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisParameters {
    pub target_position: u8,
    pub actual_position: u8,
    pub target_velocity: u8,
    pub actual_velocity: u8,
    pub max_velocity: u8,
    pub max_acceleration: u8,
    pub run_current: u8,
    pub standby_current: u8,
    pub position_reached: u8,
    pub microstep_resolution: Option<u8>,
    pub status_flags: Option<u8>,
    pub error_flags: Option<u8>,
}

/// Numbering shared by Trinamic stepper modules and evaluation boards
pub const STEPPER: AxisParameters = AxisParameters {
    target_position: 0,
    actual_position: 1,
    target_velocity: 2,
    actual_velocity: 3,
    max_velocity: 4,
    max_acceleration: 5,
    run_current: 6,
    standby_current: 7,
    position_reached: 8,
    microstep_resolution: Some(140),
    status_flags: None,
    error_flags: None,
};

/// TMC2590 evaluation board: driver status flags in parameter 208
pub const TMC2590_EVAL: AxisParameters = AxisParameters {
    status_flags: Some(208),
    ..STEPPER
};

/// TMC5130 evaluation board
pub const TMC5130_EVAL: AxisParameters = AxisParameters {
    status_flags: Some(207),
    error_flags: Some(208),
    ..STEPPER
};
