//! Reverse proxy in front of the backend service

pub mod forward;
pub mod serve;
