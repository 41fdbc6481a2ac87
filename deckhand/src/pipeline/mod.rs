//! Release pipeline: build, publish, register, roll out

pub mod executor;
pub mod fsm;
pub mod inputs;
