// Motor axis façade
//
// Provides:
// - The `AxisControl` capability (rotate, stop, move, parameter get/set)
// - `MotorAxis`, one implementation driven by a per-family parameter table
// - Axis parameter tables for common Trinamic devices

mod axis;
pub mod params;

pub use axis::{AxisControl, MotorAxis};
pub use params::{AxisParameters, STEPPER, TMC2590_EVAL, TMC5130_EVAL};
