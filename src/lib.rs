//! Monitor and control a solar-powered cellular sensor node through the
//! Particle Cloud API.

pub mod api;
pub mod config;
pub mod device;
pub mod export;
pub mod logging;
pub mod monitor;
pub mod poll;
pub mod stream;
pub mod token;
pub mod watch;
