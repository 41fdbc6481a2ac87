//! Local stand-ins for the registry and the orchestrator

pub mod builder;
pub mod cluster;
pub mod launcher;
pub mod registry;
