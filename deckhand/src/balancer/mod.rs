//! Load balancer health evaluation and routing

pub mod group;
pub mod probe;
pub mod serve;
pub mod target;
