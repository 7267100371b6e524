//! Command channel: dose commands out, tank readings in, over MQTT.
//!
//! [`MqttPublisher`] is the outbound handle. [`ChannelSupervisor`] owns the
//! MQTT event loop in its own task: it reconnects with a fixed delay after
//! any connection error, re-subscribes to the tank status topic on every
//! ConnAck, and forwards inbound tank readings to the ingestion path.
//!
//! Commands issued while the connection is down are rejected, not queued.

pub mod policy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MqttConfig;
use crate::dosing::DoseCommand;
use crate::error::TransportError;
use crate::ingest::TankReading;

pub use policy::ReconnectPolicy;

/// Capacity of the MQTT client request channel.
const CLIENT_CAPACITY: usize = 16;

/// Anything that can deliver a dose command to the pond controller.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver one command.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the command could not be handed to the
    /// transport. Nothing is retried.
    async fn publish(&self, command: &DoseCommand) -> Result<(), TransportError>;
}

/// Outbound MQTT handle for dose commands.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Build the client pair. The returned supervisor must be spawned for
    /// anything to reach the broker.
    pub fn new(
        config: &MqttConfig,
        inbound_tx: mpsc::Sender<TankReading>,
    ) -> (Self, ChannelSupervisor) {
        // A duplicate id kicks the older session off the broker.
        let client_id = format!("{}-{}", config.client_id, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let publisher = Self {
            client: client.clone(),
            topic: config.command_topic.clone(),
            connected: Arc::clone(&connected),
        };
        let supervisor = ChannelSupervisor {
            client,
            eventloop,
            status_topic: config.status_topic.clone(),
            policy: ReconnectPolicy::fixed(config.reconnect_delay()),
            connected,
            inbound_tx,
        };
        (publisher, supervisor)
    }

    /// Whether the supervisor currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CommandSink for MqttPublisher {
    async fn publish(&self, command: &DoseCommand) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let payload = command.encode()?;
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .await?;
        info!(
            pond_id = command.pond_id(),
            kind = ?command.kind(),
            magnitudes = ?command.magnitudes(),
            "dose command published"
        );
        Ok(())
    }
}

/// Owns the MQTT event loop and keeps the connection alive.
pub struct ChannelSupervisor {
    client: AsyncClient,
    eventloop: EventLoop,
    status_topic: String,
    policy: ReconnectPolicy,
    connected: Arc<AtomicBool>,
    inbound_tx: mpsc::Sender<TankReading>,
}

impl ChannelSupervisor {
    /// Drive the connection until shutdown.
    ///
    /// Connection errors never end the task: it waits per the reconnect
    /// policy and polls again, indefinitely. The shutdown signal is checked
    /// both while polling and while waiting.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(topic = %self.status_topic, "command channel supervisor started");
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                event = self.eventloop.poll() => match event {
                    Ok(event) => {
                        if self.handle_event(event).await {
                            attempt = 0;
                        }
                    }
                    Err(e) => {
                        let was_connected = self.connected.swap(false, Ordering::AcqRel);
                        let delay = self.policy.next(attempt);
                        warn!(
                            error = %e,
                            attempt,
                            was_connected,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "command channel down, retrying"
                        );
                        attempt = attempt.saturating_add(1);

                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                },
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "disconnect request not delivered");
        }
        info!("command channel supervisor stopped");
    }

    /// Handle one event. Returns true when a connection was (re)established.
    async fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                self.connected.store(true, Ordering::Release);
                info!("command channel connected");
                if let Err(e) = self
                    .client
                    .try_subscribe(&self.status_topic, QoS::AtLeastOnce)
                {
                    warn!(error = %e, topic = %self.status_topic, "subscribe failed");
                }
                true
            }
            Event::Incoming(Packet::Publish(publish)) if publish.topic == self.status_topic => {
                match decode_tank_reading(&publish.payload) {
                    Some(reading) => {
                        if self.inbound_tx.send(reading).await.is_err() {
                            warn!("tank reading receiver dropped");
                        }
                    }
                    None => debug!(topic = %publish.topic, "ignoring non-tank status message"),
                }
                false
            }
            _ => false,
        }
    }
}

/// Decode a status-topic payload. Only messages carrying
/// `powder_distances` are tank readings.
pub fn decode_tank_reading(payload: &[u8]) -> Option<TankReading> {
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed status message");
            return None;
        }
    };
    if value.get("powder_distances").is_none() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(reading) => Some(reading),
        Err(e) => {
            warn!(error = %e, "status message is not a tank reading");
            None
        }
    }
}
