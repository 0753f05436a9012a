//! Core library for the weather distribution server.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Abstraction over weather providers, with a climate simulator behind them
//! - Shared domain models (locations, readings)
//! - The line-delimited JSON protocol, client sessions and the TCP server
//!
//! It is used by `weather-server`, but can also be reused by other binaries or services.

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod registry;
pub mod server;
pub mod session;
pub mod simulator;
pub mod wire;

pub use client::WeatherClient;
pub use config::{Config, DistributionMode, ProviderConfig, ServerSettings};
pub use error::{ServerError, WireError};
pub use model::{Condition, Location, WeatherData};
pub use provider::{ProviderId, WeatherProvider};
pub use registry::SessionRegistry;
pub use server::DistributionServer;
pub use session::{SessionHandle, SessionState};
pub use simulator::ClimateSimulator;
