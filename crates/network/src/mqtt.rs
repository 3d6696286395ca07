//! Publish/subscribe over MQTT
//!
//! One broker session per process. The connection task owns the rumqttc event
//! loop, hands incoming publishes to a `MessageHandler`, and re-subscribes
//! after every ConnAck because sessions are clean.

use crate::error::{NetworkError, NetworkResult};
use async_trait::async_trait;
use cloudsync_core::{AppError, Delivery, EventBus, MessageHandler, QosLevel, Result};
use cloudsync_resilience::{Backoff, RetryPolicy};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Requests buffered between publishers and the connection task
const REQUEST_CAPACITY: usize = 64;

/// How long shutdown waits for queued packets to reach the broker
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Message the broker publishes for us if the session dies uncleanly
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub keep_alive: Duration,
    pub client_id: String,
    /// Retained at-least-once will, normally the `offline` status
    pub last_will: Option<Will>,
    /// Delay schedule between reconnect attempts
    pub reconnect: RetryPolicy,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            use_tls: true,
            keep_alive: Duration::from_secs(60),
            client_id: client_id.into(),
            last_will: None,
            reconnect: RetryPolicy::unbounded()
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(60)),
        }
    }

    /// A client id unique to this process: `<device>_session_<6 hex>`
    ///
    /// Two processes of one device must not share a broker session, or the
    /// broker disconnects the older one.
    pub fn session_client_id(device_id: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_session_{}", device_id, &suffix[..6])
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if !self.username.is_empty() {
            options.set_credentials(&self.username, &self.password);
        }
        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        if let Some(will) = &self.last_will {
            options.set_last_will(LastWill::new(
                &will.topic,
                will.payload.clone(),
                QoS::AtLeastOnce,
                true,
            ));
        }
        options
    }
}

/// `EventBus` over an MQTT broker
pub struct MqttBus {
    client: AsyncClient,
    event_loop: Mutex<EventLoop>,
    connected: Arc<AtomicBool>,
    client_id: String,
    reconnect: RetryPolicy,
}

impl MqttBus {
    /// Creates the client; nothing touches the network until `run`
    pub fn new(settings: MqttSettings) -> Self {
        let (client, event_loop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
        log::info!(
            "MQTT client created for {}:{} as {} (tls: {})",
            settings.host,
            settings.port,
            settings.client_id,
            settings.use_tls
        );
        Self {
            client,
            event_loop: Mutex::new(event_loop),
            connected: Arc::new(AtomicBool::new(false)),
            client_id: settings.client_id,
            reconnect: settings.reconnect,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Drives the broker connection until `shutdown` turns true or its
    /// sender is dropped
    ///
    /// Reconnects forever with capped exponential backoff; the schedule
    /// restarts after every successful ConnAck. On shutdown the queued
    /// publishes are flushed and the session is closed cleanly, so the will
    /// is not sent.
    pub async fn run(
        &self,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> NetworkResult<()> {
        let mut event_loop = self
            .event_loop
            .try_lock()
            .map_err(|_| NetworkError::Broker("connection task already running".to_string()))?;
        let mut backoff = Backoff::new(self.reconnect.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                event = event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        log::error!("Broker refused connection: {:?}", ack.code);
                        continue;
                    }
                    log::info!("Connected to broker as {}", self.client_id);
                    self.connected.store(true, Ordering::SeqCst);
                    backoff.reset();
                    for topic in handler.subscriptions() {
                        if let Err(e) = self.client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                            log::error!("Subscribe to {} failed: {}", topic, e);
                        }
                    }
                    handler.on_connected().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handler.on_message(&publish.topic, &publish.payload).await;
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    log::debug!("Subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    log::warn!("Broker closed the session");
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        log::warn!("Broker connection lost: {}", e);
                    } else {
                        log::debug!("Broker connection attempt failed: {}", e);
                    }
                    let delay = backoff.next_delay();
                    log::debug!("Reconnecting in {:?} (attempt {})", delay, backoff.attempts());
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.close(&mut event_loop).await;
        Ok(())
    }

    async fn close(&self, event_loop: &mut EventLoop) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.client.disconnect().await {
            log::debug!("Disconnect request failed: {}", e);
            return;
        }
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            log::warn!("Broker did not accept disconnect within {:?}", DRAIN_TIMEOUT);
        } else {
            log::info!("Disconnected from broker");
        }
    }
}

#[async_trait]
impl EventBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> Result<()> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected.into());
        }
        let size = payload.len();
        self.client
            .publish(topic, qos(delivery.qos), delivery.retain, payload)
            .await
            .map_err(|e| AppError::BrokerError {
                message: format!("publish to {} failed: {}", topic, e),
            })?;
        log::debug!("Published {} bytes to {}", size, topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn qos(level: QosLevel) -> QoS {
    match level {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    #[async_trait]
    impl MessageHandler for NullHandler {
        fn subscriptions(&self) -> Vec<String> {
            vec!["cloudsync/watched/+".to_string()]
        }

        async fn on_connected(&self) {}

        async fn on_message(&self, _topic: &str, _payload: &[u8]) {}
    }

    #[test]
    fn test_session_client_id() {
        let a = MqttSettings::session_client_id("cloudsync_1a2b3c4d");
        let b = MqttSettings::session_client_id("cloudsync_1a2b3c4d");
        assert!(a.starts_with("cloudsync_1a2b3c4d_session_"));
        assert_eq!(a.len(), "cloudsync_1a2b3c4d_session_".len() + 6);
        assert_ne!(a, b);
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos(QosLevel::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(qos(QosLevel::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(qos(QosLevel::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_publish_without_session_fails() {
        let bus = MqttBus::new(MqttSettings::new("127.0.0.1", 9, "test"));
        assert!(!bus.is_connected());

        let delivery = Delivery {
            qos: QosLevel::AtLeastOnce,
            retain: false,
            expiry: None,
        };
        let result = bus.publish("cloudsync/watched/x", b"{}".to_vec(), delivery).await;
        assert!(matches!(result, Err(AppError::ConnectionLost { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_while_unreachable() {
        let mut settings = MqttSettings::new("127.0.0.1", 9, "test");
        settings.use_tls = false;
        settings.reconnect = RetryPolicy::unbounded()
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50));
        let bus = Arc::new(MqttBus::new(settings));
        let (tx, rx) = watch::channel(false);

        let task = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.run(Arc::new(NullHandler), rx).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert!(!bus.is_connected());
    }
}
