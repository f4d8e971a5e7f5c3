use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rumqttc::{
    v5::{
        mqttbytes::{
            v5::{ConnectReturnCode, Packet},
            QoS,
        },
        AsyncClient, Event, EventLoop, MqttOptions,
    },
    Transport,
};
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{error::MonitorError, ControlCommand, MonitorEvent, Topics};

/// default pause between reconnect attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How to reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrokerTransport {
    /// plain mqtt over tcp
    Tcp,
    /// mqtt over websockets, at /mqtt
    Ws,
}

/// The chief processor of broker traffic, this handles
/// - mqtt state and reconnects
/// - reception of the sensor topics, forwarded as events
///     Takes in two channels:
/// - control_rx: A receiver of LED commands, it then publishes them
/// - event_tx: A sender of every status change, sensor message, and connection error
pub struct MqttProcessor {
    cancel_token: CancellationToken,
    control_rx: Receiver<ControlCommand>,
    event_tx: UnboundedSender<MonitorEvent>,
    topics: Topics,
    opts: MqttProcessorOptions,
}

/// processor options, these are static immutable settings
#[derive(Debug, Clone)]
pub struct MqttProcessorOptions {
    /// host:port of the broker
    pub mqtt_path: String,
    /// tcp or websocket
    pub transport: BrokerTransport,
    /// sleep after a connection error before polling again
    pub retry_delay: Duration,
}

/// Build client options for the broker at `host:port`
pub fn build_mqtt_options(
    client_prefix: &str,
    mqtt_path: &str,
    transport: BrokerTransport,
) -> Result<MqttOptions, MonitorError> {
    let (host, port) = mqtt_path
        .rsplit_once(':')
        .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
        .filter(|(host, _)| !host.is_empty())
        .ok_or_else(|| MonitorError::BrokerAddress(mqtt_path.to_string()))?;

    let client_id = format!(
        "{}-{}",
        client_prefix,
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    );

    let mut mqtt_opts = match transport {
        BrokerTransport::Tcp => MqttOptions::new(client_id, host, port),
        BrokerTransport::Ws => {
            let mut opts =
                MqttOptions::new(client_id, format!("ws://{}:{}/mqtt", host, port), port);
            opts.set_transport(Transport::Ws);
            opts
        }
    };
    mqtt_opts
        .set_keep_alive(Duration::from_secs(60))
        .set_clean_start(true)
        .set_connection_timeout(5);
    Ok(mqtt_opts)
}

/// Turn a received publish into a queue item, None if the bytes are not text
pub fn publish_to_event(topic: &[u8], payload: &[u8], received: DateTime<Utc>) -> Option<MonitorEvent> {
    let Ok(topic) = std::str::from_utf8(topic) else {
        warn!("Could not parse topic, topic: {:?}", topic);
        return None;
    };
    let Ok(payload) = std::str::from_utf8(payload) else {
        warn!("Could not parse payload, topic: {}, bytes: {:?}", topic, payload);
        return None;
    };
    Some(MonitorEvent::Sensor {
        topic: topic.to_string(),
        payload: payload.to_string(),
        received,
    })
}

impl MqttProcessor {
    /// Creates a new mqtt receiver and sender
    pub fn new(
        cancel_token: CancellationToken,
        control_rx: Receiver<ControlCommand>,
        event_tx: UnboundedSender<MonitorEvent>,
        topics: Topics,
        opts: MqttProcessorOptions,
    ) -> Result<(MqttProcessor, MqttOptions), MonitorError> {
        let mqtt_opts = build_mqtt_options("gudang", &opts.mqtt_path, opts.transport)?;

        Ok((
            MqttProcessor {
                cancel_token,
                control_rx,
                event_tx,
                topics,
                opts,
            },
            mqtt_opts,
        ))
    }

    fn send_event(&self, event: MonitorEvent) {
        if let Err(err) = self.event_tx.send(event) {
            warn!("Error queueing event! {}", err);
        }
    }

    async fn subscribe_all(&self, client: &AsyncClient) {
        for topic in self.topics.subscribed() {
            debug!("Subscribing to {}", topic);
            if let Err(err) = client.subscribe(topic, QoS::AtMostOnce).await {
                warn!("Could not subscribe to {}: {}", topic, err);
            }
        }
    }

    /// This handles the reception of mqtt messages, will not return until cancelled
    /// * `eventloop` - The eventloop returned by ::new to connect to.  Polling it again after an error reconnects
    /// * `client` - The async mqtt v5 client to use for subscriptions and control messages
    pub async fn process_mqtt(mut self, client: Arc<AsyncClient>, mut eventloop: EventLoop) {
        info!("Connecting to {} over {:?}", self.opts.mqtt_path, self.opts.transport);
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Shutting down MQTT processor!");
                    if let Err(err) = client.disconnect().await {
                        trace!("Disconnect failed: {}", err);
                    }
                    break;
                },
                msg = eventloop.poll() => match msg {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            info!("Connected to broker");
                            self.send_event(MonitorEvent::Status(true));
                            self.subscribe_all(&client).await;
                        } else {
                            warn!("Broker refused connection: {:?}", ack.code);
                            self.send_event(MonitorEvent::Status(false));
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        trace!("Received publish on {:?}", msg.topic);
                        if let Some(event) = publish_to_event(&msg.topic, &msg.payload, Utc::now()) {
                            self.send_event(event);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Connection error, retrying in {:?}: {}", self.opts.retry_delay, e);
                        self.send_event(MonitorEvent::Error(e.to_string()));
                        tokio::select! {
                            _ = self.cancel_token.cancelled() => {},
                            _ = tokio::time::sleep(self.opts.retry_delay) => {},
                        }
                    }
                },
                sendable = self.control_rx.recv() => {
                    match sendable {
                        Some(cmd) => {
                            info!("Publishing {} to {}", cmd.payload(), self.topics.control());
                            let Ok(_) = client.publish(self.topics.control(), QoS::AtLeastOnce, false, cmd.payload().as_bytes().to_vec()).await else {
                                warn!("Failed to send MQTT message!");
                                continue;
                            };
                        },
                        None => continue,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_options() {
        let opts = build_mqtt_options("gudang", "broker.emqx.io:1883", BrokerTransport::Tcp).unwrap();
        assert_eq!(
            opts.broker_address(),
            ("broker.emqx.io".to_string(), 1883)
        );
        assert!(opts.client_id().starts_with("gudang-"));
        assert_eq!(opts.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn ws_options_use_url() {
        let opts = build_mqtt_options("gudang", "broker.emqx.io:8083", BrokerTransport::Ws).unwrap();
        assert_eq!(
            opts.broker_address(),
            ("ws://broker.emqx.io:8083/mqtt".to_string(), 8083)
        );
    }

    #[test]
    fn bad_addresses() {
        for addr in ["broker.emqx.io", ":1883", "host:port", "host:99999"] {
            assert!(matches!(
                build_mqtt_options("gudang", addr, BrokerTransport::Tcp),
                Err(MonitorError::BrokerAddress(_))
            ));
        }
    }

    #[test]
    fn publish_becomes_sensor_event() {
        let now = Utc::now();
        assert_eq!(
            publish_to_event(b"smuhsa/gudang/suhu", b"27.1", now),
            Some(MonitorEvent::Sensor {
                topic: "smuhsa/gudang/suhu".to_string(),
                payload: "27.1".to_string(),
                received: now,
            })
        );
        assert_eq!(publish_to_event(b"smuhsa/gudang/suhu", &[0xff, 0xfe], now), None);
    }

    #[tokio::test]
    async fn cancelled_processor_exits() {
        let token = CancellationToken::new();
        let (_control_tx, control_rx) = tokio::sync::mpsc::channel(4);
        let (event_tx, _event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (processor, opts) = MqttProcessor::new(
            token.clone(),
            control_rx,
            event_tx,
            Topics::default(),
            MqttProcessorOptions {
                mqtt_path: "127.0.0.1:1".to_string(),
                transport: BrokerTransport::Tcp,
                retry_delay: Duration::from_millis(10),
            },
        )
        .unwrap();
        let (client, eventloop) = AsyncClient::new(opts, 10);
        token.cancel();
        tokio::time::timeout(
            Duration::from_secs(5),
            processor.process_mqtt(Arc::new(client), eventloop),
        )
        .await
        .expect("processor should stop once cancelled");
    }

    #[tokio::test]
    async fn connection_errors_are_queued_and_retried() {
        let token = CancellationToken::new();
        let (_control_tx, control_rx) = tokio::sync::mpsc::channel(4);
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (processor, opts) = MqttProcessor::new(
            token.clone(),
            control_rx,
            event_tx,
            Topics::default(),
            MqttProcessorOptions {
                mqtt_path: "127.0.0.1:1".to_string(),
                transport: BrokerTransport::Tcp,
                retry_delay: Duration::from_millis(20),
            },
        )
        .unwrap();
        let (client, eventloop) = AsyncClient::new(opts, 10);
        let handle = tokio::spawn(processor.process_mqtt(Arc::new(client), eventloop));

        // nothing listens on port 1, every poll fails and is retried
        let mut errors = 0;
        while errors < 3 {
            let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
                .await
                .expect("retry loop stalled")
                .expect("event queue closed");
            match event {
                MonitorEvent::Error(msg) => {
                    assert!(!msg.is_empty());
                    errors += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("processor should stop once cancelled")
            .unwrap();
    }
}
