//! Persistent-publish transport over MQTT.
//!
//! The `rumqttc` synchronous client is driven by a dedicated OS thread that
//! owns the network connection and reconnects after failures. That thread
//! is the only writer of the connection state; `send` reads the state before
//! every publish. Calls into the blocking client go through
//! `spawn_blocking` so the async loops never block on broker I/O.
//!
//! A successful `send` means the publish was handed to the local client at
//! QoS 1. Broker acknowledgment is not awaited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, Incoming, MqttOptions, Outgoing, QoS,
    TlsConfiguration, Transport as MqttWire,
};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::TransportError;
use crate::config::{MqttConfig, MqttTlsConfig};
use crate::payload::Payload;

/// Capacity of the client's request channel.
const REQUEST_CAPACITY: usize = 64;

/// Pause between failed connection attempts on the I/O thread.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Granularity at which the I/O thread checks for shutdown while waiting.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Broker connection state as seen by the I/O thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    Connected,
    Disconnected,
    /// The transport has been closed
    Stopped,
}

/// MQTT transport publishing payloads to one topic.
pub struct MqttTransport {
    client: Client,
    topic: String,
    broker: String,
    state: watch::Receiver<ConnectionState>,
    reconnect_timeout: Duration,
    stop: Arc<AtomicBool>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MqttTransport {
    /// Start the I/O thread and begin connecting to the broker.
    ///
    /// Returns once the client exists; the connection itself is established
    /// in the background. TLS material is read here, once.
    pub async fn connect(
        config: &MqttConfig,
        device_id: &str,
        token: Option<&str>,
    ) -> Result<Self, TransportError> {
        if device_id.trim().is_empty() {
            return Err(TransportError::Mqtt(
                "device id is required as the MQTT client id".to_string(),
            ));
        }

        let mut options = MqttOptions::new(device_id, config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        if let Some(token) = token {
            options.set_credentials(device_id, token);
        }
        if let Some(tls) = &config.tls {
            options.set_transport(MqttWire::tls_with_config(load_tls(tls).await?));
        }

        let broker = format!("{}:{}", config.host, config.port);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let stop = Arc::new(AtomicBool::new(false));
        let (client_tx, client_rx) = oneshot::channel();

        // The connection owns its own runtime; it must be created and
        // dropped on the I/O thread, never inside the async context.
        let thread_stop = Arc::clone(&stop);
        let thread_broker = broker.clone();
        let io_thread = thread::Builder::new()
            .name("mqtt-io".to_string())
            .spawn(move || {
                let (client, connection) = Client::new(options, REQUEST_CAPACITY);
                if client_tx.send(client).is_err() {
                    return;
                }
                run_connection(connection, state_tx, thread_stop, thread_broker);
            })
            .map_err(TransportError::Io)?;

        let client = client_rx.await.map_err(|_| {
            TransportError::Mqtt("MQTT I/O thread exited during startup".to_string())
        })?;

        info!(broker = %broker, topic = %config.topic, tls = config.tls.is_some(), "MQTT transport started");

        Ok(Self {
            client,
            topic: config.topic.clone(),
            broker,
            state: state_rx,
            reconnect_timeout: config.reconnect_timeout,
            stop,
            io_thread: Mutex::new(Some(io_thread)),
            closed: AtomicBool::new(false),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Publish one payload at QoS 1.
    ///
    /// When disconnected, waits up to the reconnect timeout for the I/O
    /// thread to restore the connection and gives up (`false`) otherwise.
    pub async fn send(&self, payload: &Payload) -> bool {
        if self.closed.load(Ordering::Acquire) {
            debug!("MQTT transport closed, not sending");
            return false;
        }

        if !self.is_connected() {
            debug!(broker = %self.broker, "MQTT not connected, waiting for reconnect");
            let mut state = self.state.clone();
            let reconnected = matches!(
                tokio::time::timeout(
                    self.reconnect_timeout,
                    state.wait_for(|s| *s == ConnectionState::Connected),
                )
                .await,
                Ok(Ok(_))
            );
            if !reconnected {
                warn!(
                    broker = %self.broker,
                    waited_ms = self.reconnect_timeout.as_millis() as u64,
                    "MQTT reconnect failed"
                );
                return false;
            }
        }

        let message = match payload.to_json() {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Failed to serialize payload for MQTT");
                return false;
            }
        };
        let size = message.len();

        let client = self.client.clone();
        let topic = self.topic.clone();
        let published = tokio::task::spawn_blocking(move || {
            client.publish(topic, QoS::AtLeastOnce, false, message.into_bytes())
        })
        .await;

        match published {
            Ok(Ok(())) => {
                info!(topic = %self.topic, size, "MQTT published");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, topic = %self.topic, "MQTT publish error");
                false
            }
            Err(e) => {
                warn!(error = %e, "MQTT publish task failed");
                false
            }
        }
    }

    /// Disconnect from the broker and join the I/O thread.
    ///
    /// Must be called once; a second call is logged and ignored.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("MQTT transport already closed");
            return;
        }

        self.stop.store(true, Ordering::Release);
        let client = self.client.clone();
        let io_thread = self.io_thread.lock().take();

        let joined = tokio::task::spawn_blocking(move || {
            if let Err(e) = client.disconnect() {
                debug!(error = %e, "MQTT disconnect request not delivered");
            }
            io_thread.map(|handle| handle.join().is_ok())
        })
        .await;

        match joined {
            Ok(Some(false)) => error!("MQTT I/O thread panicked"),
            Err(e) => error!(error = %e, "MQTT shutdown task failed"),
            _ => info!(broker = %self.broker, "MQTT transport closed"),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Drive the connection until shutdown. Sole writer of the state channel.
fn run_connection(
    mut connection: Connection,
    state: watch::Sender<ConnectionState>,
    stop: Arc<AtomicBool>,
    broker: String,
) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!(broker = %broker, "MQTT connected");
                    state.send_replace(ConnectionState::Connected);
                } else {
                    warn!(broker = %broker, code = ?ack.code, "MQTT connect refused");
                    state.send_replace(ConnectionState::Disconnected);
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                warn!(broker = %broker, "MQTT disconnected by broker");
                state.send_replace(ConnectionState::Disconnected);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if *state.borrow() != ConnectionState::Disconnected {
                    warn!(broker = %broker, error = %e, "MQTT connection lost");
                }
                state.send_replace(ConnectionState::Disconnected);
                if wait_or_stop(&stop, RECONNECT_DELAY) {
                    break;
                }
            }
        }

        if stop.load(Ordering::Acquire) && *state.borrow() != ConnectionState::Connected {
            break;
        }
    }

    state.send_replace(ConnectionState::Stopped);
    debug!("MQTT I/O thread exiting");
}

/// Sleep for `delay`, returning early with `true` if shutdown is requested.
fn wait_or_stop(stop: &AtomicBool, delay: Duration) -> bool {
    let mut waited = Duration::ZERO;
    while waited < delay {
        if stop.load(Ordering::Acquire) {
            return true;
        }
        thread::sleep(STOP_POLL);
        waited += STOP_POLL;
    }
    stop.load(Ordering::Acquire)
}

async fn load_tls(tls: &MqttTlsConfig) -> Result<TlsConfiguration, TransportError> {
    let ca = read_pem(&tls.ca_file).await?;
    let client_auth = match &tls.client_auth {
        Some((cert, key)) => Some((read_pem(cert).await?, read_pem(key).await?)),
        None => None,
    };

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}

async fn read_pem(path: &std::path::Path) -> Result<Vec<u8>, TransportError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| TransportError::Tls {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::DeviceIdentity;
    use crate::sensors::Readings;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn unreachable_broker() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            // Nothing listens on the discard port
            port: 9,
            reconnect_timeout: Duration::from_millis(200),
            ..MqttConfig::default()
        }
    }

    fn payload() -> Payload {
        let readings = Readings {
            temperature: 26.0,
            humidity: 60.0,
            crowd: 5,
            prices: BTreeMap::new(),
        };
        Payload::new(&DeviceIdentity::new("DEV-001", "PASAR-001"), readings, Utc::now())
    }

    #[tokio::test]
    async fn test_send_fails_when_broker_unreachable() {
        let transport = MqttTransport::connect(&unreachable_broker(), "DEV-001", None)
            .await
            .unwrap();

        assert!(!transport.send(&payload()).await);
        assert!(!transport.is_connected());

        transport.close().await;
        assert_eq!(transport.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let transport = MqttTransport::connect(&unreachable_broker(), "DEV-001", Some("tok"))
            .await
            .unwrap();
        transport.close().await;
        transport.close().await;

        assert!(!transport.send(&payload()).await);
    }

    #[tokio::test]
    async fn test_empty_client_id_rejected() {
        let result = MqttTransport::connect(&unreachable_broker(), " ", None).await;
        assert!(matches!(result, Err(TransportError::Mqtt(_))));
    }

    #[tokio::test]
    async fn test_missing_tls_file_is_construction_error() {
        let config = MqttConfig {
            tls: Some(MqttTlsConfig {
                ca_file: PathBuf::from("/nonexistent/ca.pem"),
                client_auth: None,
            }),
            ..unreachable_broker()
        };

        match MqttTransport::connect(&config, "DEV-001", None).await {
            Err(TransportError::Tls { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/ca.pem"))
            }
            other => panic!("expected TLS error, got {:?}", other.map(|_| ())),
        }
    }
}
