//! Backend HTTP service

pub mod handlers;
pub mod serve;
pub mod state;
