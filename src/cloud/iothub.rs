//! IoT-Hub MQTT conventions over the generic client

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::config::CloudConfig;
use crate::mqtt::{self, MqttHandle, MqttMessages, MqttOptions};
use crate::protocol::QoS;
use crate::remote::{ChannelError, ChannelStatus, CloudSender};
use crate::transport::{client_config, parse_address, Endpoint};

/// API version sent in the MQTT username
pub const API_VERSION: &str = "2021-04-12";

/// Device-to-cloud topic
pub fn events_topic(device_id: &str) -> String {
    format!("devices/{}/messages/events/", device_id)
}

/// Cloud-to-device subscription
pub fn devicebound_filter(device_id: &str) -> String {
    format!("devices/{}/messages/devicebound/#", device_id)
}

/// Sending half of the cloud device link
#[derive(Clone)]
pub struct IotHubChannel {
    handle: MqttHandle,
    events_topic: String,
}

impl IotHubChannel {
    /// Build client options for the configured hub
    pub fn options(config: &CloudConfig) -> Result<MqttOptions, ChannelError> {
        let (host, port) = parse_address(&config.address, config.protocol.default_port());

        let tls = if config.protocol.uses_tls() {
            let tls = client_config(config.ca_cert.as_deref())
                .map_err(|e| ChannelError::InvalidConfig(e.to_string()))?;
            Some(tls)
        } else {
            None
        };

        let hub_host = config.hub_host.clone().unwrap_or_else(|| host.clone());
        let username = config.username.clone().unwrap_or_else(|| {
            format!("{}/{}/?api-version={}", hub_host, config.device_id, API_VERSION)
        });

        let endpoint = Endpoint {
            host,
            port,
            tls,
            connect_timeout: config.connect_timeout,
        };

        let mut options = MqttOptions::new("cloud", endpoint, config.device_id.clone());
        options.keep_alive = config.keepalive;
        options.username = Some(username);
        options.password = config.sas_token.clone();
        options.ack_timeout = config.ack_timeout;
        options.subscriptions = vec![(devicebound_filter(&config.device_id), QoS::AtLeastOnce)];
        Ok(options)
    }

    /// Connect to the hub and subscribe to cloud-to-device messages
    pub async fn connect(config: &CloudConfig) -> Result<(Self, MqttMessages), ChannelError> {
        let options = Self::options(config)?;
        let (handle, messages) = mqtt::connect(options).await?;
        info!("Cloud channel connected as device '{}'", config.device_id);

        let channel = Self {
            handle,
            events_topic: events_topic(&config.device_id),
        };
        Ok((channel, messages))
    }

    pub fn status(&self) -> ChannelStatus {
        self.handle.status()
    }

    pub async fn shutdown(&self) {
        self.handle.disconnect().await;
    }
}

#[async_trait]
impl CloudSender for IotHubChannel {
    async fn send_message(&self, body: String) -> Result<(), ChannelError> {
        self.handle
            .publish(&self.events_topic, Bytes::from(body), QoS::AtLeastOnce)
            .await
    }
}
