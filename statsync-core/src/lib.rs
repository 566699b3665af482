//! Rate-limited collection of game statistics from an upstream API.
//!
//! Two limiters sit at the core: [`throttle::RequestThrottle`] protects the gateway from its
//! own clients, and [`scheduler::PermitScheduler`] paces our calls to the upstream.

pub mod accounts;
pub mod clock;
pub mod collection;
pub mod config;
pub mod db;
pub mod endpoints;
pub mod error;
pub mod observability;
pub mod routes;
pub mod scheduler;
pub mod throttle;
pub mod upstream;
pub mod utils;

#[cfg(test)]
mod testing;
