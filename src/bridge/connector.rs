//! Channel establishment for the supervisor
//!
//! A connector opens a fresh set of channel handles for one bridge session.
//! Dropping the handles of a session closes its connections.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::cloud::{EventStream, IotHubChannel, SourceEvents};
use crate::config::{BridgeConfig, CloudConfig, LocalConfig};
use crate::mqtt::{self, MqttOptions};
use crate::remote::{ChannelError, CloudSender, LocalPublisher, MessageSource};
use crate::transport::{parse_address, Endpoint};

/// Handles for one pump session
pub struct Channels {
    pub local_source: Box<dyn MessageSource>,
    pub local_publisher: Arc<dyn LocalPublisher>,
    pub cloud_source: Box<dyn MessageSource>,
    pub cloud_sender: Arc<dyn CloudSender>,
}

/// Handles for one event-stream session
pub struct EventChannels {
    pub events: Box<dyn EventStream>,
    /// Send side of the cloud link; holding it keeps the session open
    pub cloud_sender: Option<Arc<dyn CloudSender>>,
}

/// Opens both channels for the pump
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Channels, ChannelError>;
}

/// Opens the cloud event stream
#[async_trait]
pub trait EventConnector: Send + Sync {
    async fn connect(&self) -> Result<EventChannels, ChannelError>;
}

/// Local broker + cloud device link, both over MQTT
pub struct MqttConnector {
    local: MqttOptions,
    cloud: CloudConfig,
}

impl MqttConnector {
    pub fn new(local: &LocalConfig, cloud: &CloudConfig, bridge: &BridgeConfig) -> Self {
        Self {
            local: local_options(local, bridge),
            cloud: cloud.clone(),
        }
    }
}

/// Client options for the local broker subscription
pub fn local_options(local: &LocalConfig, bridge: &BridgeConfig) -> MqttOptions {
    let (host, port) = parse_address(&local.address, 1883);
    let endpoint = Endpoint {
        host,
        port,
        tls: None,
        connect_timeout: local.connect_timeout,
    };

    let mut options = MqttOptions::new("local", endpoint, local.client_id.clone());
    options.keep_alive = local.keepalive;
    options.username = local.username.clone();
    options.password = local.password.clone();
    options.ack_timeout = local.ack_timeout;
    options.subscriptions = vec![(bridge.outbound_filter.clone(), bridge.qos())];
    options
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self) -> Result<Channels, ChannelError> {
        let (local, local_messages) = mqtt::connect(self.local.clone()).await?;
        info!(
            "Bridge: local broker connected, subscribed to '{}'",
            self.local.subscriptions[0].0
        );
        // The local session is dropped, and so closed, if this fails
        let (cloud, cloud_messages) = IotHubChannel::connect(&self.cloud).await?;

        Ok(Channels {
            local_source: Box::new(local_messages),
            local_publisher: Arc::new(local),
            cloud_source: Box::new(cloud_messages),
            cloud_sender: Arc::new(cloud),
        })
    }
}

/// Cloud-to-device messages read as a topic-less event stream
pub struct MqttEventConnector {
    cloud: CloudConfig,
}

impl MqttEventConnector {
    pub fn new(cloud: &CloudConfig) -> Self {
        Self {
            cloud: cloud.clone(),
        }
    }
}

#[async_trait]
impl EventConnector for MqttEventConnector {
    async fn connect(&self) -> Result<EventChannels, ChannelError> {
        let (cloud, messages) = IotHubChannel::connect(&self.cloud).await?;
        Ok(EventChannels {
            events: Box::new(SourceEvents::new(messages)),
            cloud_sender: Some(Arc::new(cloud)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QoS;
    use std::time::Duration;

    #[test]
    fn test_local_options_subscribe_outbound_filter() {
        let local = LocalConfig {
            address: "broker.lan".to_string(),
            client_id: "edge".to_string(),
            keepalive: 30,
            ..LocalConfig::default()
        };
        let bridge = BridgeConfig {
            outbound_filter: "telemetry/#".to_string(),
            qos: 0,
            ..BridgeConfig::default()
        };

        let options = local_options(&local, &bridge);
        assert_eq!(options.endpoint.host, "broker.lan");
        assert_eq!(options.endpoint.port, 1883);
        assert!(options.endpoint.tls.is_none());
        assert_eq!(options.client_id, "edge");
        assert_eq!(options.keep_alive, 30);
        assert_eq!(
            options.subscriptions,
            vec![("telemetry/#".to_string(), QoS::AtMostOnce)]
        );
        assert_eq!(options.endpoint.connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_connect_fails_without_broker() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let local = LocalConfig {
            address: addr.to_string(),
            ..LocalConfig::default()
        };
        let connector = MqttConnector::new(&local, &CloudConfig::default(), &BridgeConfig::default());
        let result = connector.connect().await;
        assert!(result.is_err());
    }
}
