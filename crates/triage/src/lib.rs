#![deny(clippy::all)]

pub mod commands;
pub mod consult;
pub mod serve;
pub mod telemetry;
