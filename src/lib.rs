//! Device Client Library
//!
//! This library provides the components of an edge telemetry client that
//! samples market sensors and delivers the readings to a platform:
//!
//! - **config**: Environment-based configuration for the device client
//! - **sensors**: Sensor readers with sentinel values for failed reads
//! - **payload**: Device identity and the JSON payload sent per sample
//! - **transport**: HTTP and MQTT delivery behind a swappable handle
//! - **queue**: Durable on-disk FIFO for payloads that failed to send
//! - **worker**: The sampling loop and the queue flush worker
//! - **registration**: Device registration and bearer token storage
//! - **client**: Wiring, startup and ordered shutdown
//!
//! # Example
//!
//! ```no_run
//! use device_client::config::Config;
//! use device_client::client::DeviceClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let client = DeviceClient::new(config).await.expect("Failed to start client");
//!
//!     // Samples and delivers until Ctrl+C, queueing anything that fails
//!     client
//!         .run_until(async {
//!             tokio::signal::ctrl_c().await.ok();
//!         })
//!         .await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod payload;
pub mod queue;
pub mod registration;
pub mod sensors;
pub mod transport;
pub mod worker;

pub use client::{ClientError, DeviceClient, RunningClient};
pub use config::{Config, ConfigError, SensorMode, TransportKind};
pub use payload::{DeviceIdentity, Payload, PayloadBuilder};
pub use queue::{DurableQueue, QueueEntry, QueueError};
pub use registration::{
    Registrar, RegistrationError, RegistrationResponse, TokenStore, TokenStoreError,
};
pub use sensors::{Readings, SensorError, SensorSet, SensorSource};
pub use transport::{PayloadSink, Transport, TransportError, TransportHandle, TransportSettings};
pub use worker::{DeliveryStats, FlushReport, FlushWorker, SamplingLoop, StatsSnapshot, TickOutcome};
