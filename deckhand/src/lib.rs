//! Deckhand library
//!
//! A backend with a health route, the reverse proxy that fronts it inside a
//! container, and the release pipeline that builds, publishes and rolls the
//! container out behind a health-checked load balancer.

pub mod app;
pub mod balancer;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod local;
pub mod logs;
pub mod models;
pub mod pipeline;
pub mod proxy;
pub mod rollout;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
