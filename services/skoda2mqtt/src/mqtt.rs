//! MQTT sink
//!
//! Wraps a rumqttc `AsyncClient`. The event loop runs on its own task and
//! reconnects on error; publishes queue in the client until it is back.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::publish::Sink;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Parse `host`, `host:port`, `mqtt://host[:port]` or `mqtts://host[:port]`
/// into `(host, port, tls)`.
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool)> {
    let (use_tls, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        (false, stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        (true, stripped)
    } else if url.contains("://") {
        return Err(Error::InvalidBrokerUrl(format!(
            "{url}: scheme must be mqtt:// or mqtts://"
        )));
    } else {
        (false, url)
    };
    let rest = rest.trim_end_matches('/');
    let default_port = if use_tls { 8883 } else { 1883 };

    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| Error::InvalidBrokerUrl(format!("{url}: invalid port {p}")))?;
            (h.to_string(), port)
        }
        None => (rest.to_string(), default_port),
    };

    if host.is_empty() {
        return Err(Error::InvalidBrokerUrl(format!("{url}: host cannot be empty")));
    }
    Ok((host, port, use_tls))
}

/// Sink publishing through an MQTT broker.
pub struct MqttSink {
    client: AsyncClient,
    qos: QoS,
}

impl MqttSink {
    /// Configure the client and spawn its event loop.
    pub fn connect(broker: &str, client_id: &str) -> Result<(Self, JoinHandle<()>)> {
        let (host, port, use_tls) = parse_broker_url(broker)?;

        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(KEEP_ALIVE);
        if use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        info!(host = %host, port, tls = use_tls, "MQTT client configured");

        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "MQTT connected");
                    }
                    Ok(Event::Incoming(Packet::PingResp)) => {
                        debug!("MQTT ping response received");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error, reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok((
            Self {
                client,
                qos: QoS::AtMostOnce,
            },
            handle,
        ))
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "error disconnecting MQTT client");
        }
    }
}

impl Sink for MqttSink {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
        retain: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.client
                .publish(topic, self.qos, retain, payload)
                .await
                .map_err(|e| Error::Publish {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
        })
    }
}
