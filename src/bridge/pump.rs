//! Bidirectional bridge pump
//!
//! Two independent loops share the channel handles:
//!
//! - local -> cloud: messages from the outbound subscription pass the topic
//!   filter and the loop guard, lose the outbound namespace and are sent to
//!   the cloud as `{"topic","data"}` text.
//! - cloud -> local: cloud bodies are decoded, republished under the inbound
//!   namespace and, concurrently, broadcast to viewers and queued for the
//!   durable sink.
//!
//! A bad message only costs that message. A lost connection ends the
//! direction that saw it and is returned to the owner, as is a run of
//! `max_consecutive_failures` send errors.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::fanout::FanoutHandler;
use super::loop_guard::LoopGuard;
use crate::config::BridgeConfig;
use crate::envelope::{Envelope, EnvelopeError};
use crate::metrics::Metrics;
use crate::protocol::QoS;
use crate::remote::{ChannelError, CloudSender, InboundMessage, LocalPublisher, MessageSource};
use crate::topic::{topic_matches_filter, validate_topic_name, with_namespace};

/// Pump direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local bus to cloud channel
    Outbound,
    /// Cloud channel to local bus
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "local->cloud"),
            Direction::Inbound => write!(f, "cloud->local"),
        }
    }
}

/// Terminal outcome of one pump direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpError {
    ConnectionLost {
        direction: Direction,
        reason: String,
    },
    TooManyFailures {
        direction: Direction,
        failures: u32,
        last: ChannelError,
    },
}

impl PumpError {
    pub fn direction(&self) -> Direction {
        match self {
            PumpError::ConnectionLost { direction, .. }
            | PumpError::TooManyFailures { direction, .. } => *direction,
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, PumpError::ConnectionLost { .. })
    }
}

impl fmt::Display for PumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpError::ConnectionLost { direction, reason } => {
                write!(f, "{}: connection lost: {}", direction, reason)
            }
            PumpError::TooManyFailures {
                direction,
                failures,
                last,
            } => write!(
                f,
                "{}: {} consecutive send failures, last: {}",
                direction, failures, last
            ),
        }
    }
}

impl std::error::Error for PumpError {}

/// Why one message was not delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// Payload could not be turned into an envelope
    Envelope(EnvelopeError),
    /// Derived local topic is not publishable
    InvalidTopic(String),
    /// The channel refused or failed the send
    Channel(ChannelError),
}

impl ForwardError {
    fn reason(&self) -> &'static str {
        match self {
            ForwardError::Envelope(EnvelopeError::InvalidUtf8 { .. }) => "invalid_utf8",
            ForwardError::Envelope(EnvelopeError::Serialize(_)) => "encode_error",
            ForwardError::InvalidTopic(_) => "invalid_topic",
            ForwardError::Channel(_) => "send_error",
        }
    }
}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardError::Envelope(e) => write!(f, "{}", e),
            ForwardError::InvalidTopic(topic) => write!(f, "invalid local topic '{}'", topic),
            ForwardError::Channel(e) => write!(f, "{}", e),
        }
    }
}

impl From<EnvelopeError> for ForwardError {
    fn from(e: EnvelopeError) -> Self {
        ForwardError::Envelope(e)
    }
}

impl From<ChannelError> for ForwardError {
    fn from(e: ChannelError) -> Self {
        ForwardError::Channel(e)
    }
}

/// Result of offering one local message to the outbound direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Sent,
    /// Topic is outside the outbound filter
    NotMatched,
    /// Topic carries an excluded namespace
    LoopGuarded,
}

/// Counters for one direction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub forwarded: u64,
    pub skipped: u64,
    pub dropped: u64,
}

/// Results of both directions
#[derive(Debug)]
pub struct PumpReport {
    pub outbound: Result<PumpStats, PumpError>,
    pub inbound: Result<PumpStats, PumpError>,
}

/// The bridge engine
pub struct BridgePump {
    outbound_filter: String,
    inbound_prefix: String,
    guard: LoopGuard,
    fanout: Arc<FanoutHandler>,
    qos: QoS,
    max_consecutive_failures: u32,
    metrics: Option<Arc<Metrics>>,
}

impl BridgePump {
    pub fn new(
        config: &BridgeConfig,
        fanout: Arc<FanoutHandler>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            outbound_filter: config.outbound_filter.clone(),
            inbound_prefix: config.inbound_prefix.clone(),
            guard: LoopGuard::from_config(config),
            fanout,
            qos: config.qos(),
            max_consecutive_failures: config.max_consecutive_failures,
            metrics,
        }
    }

    pub fn fanout(&self) -> &Arc<FanoutHandler> {
        &self.fanout
    }

    pub fn loop_guard(&self) -> &LoopGuard {
        &self.guard
    }

    /// Offer one local message to the cloud
    pub async fn forward_outbound<C: CloudSender + ?Sized>(
        &self,
        message: &InboundMessage,
        cloud: &C,
    ) -> Result<Outbound, ForwardError> {
        if !topic_matches_filter(&message.topic, &self.outbound_filter) {
            return Ok(Outbound::NotMatched);
        }
        if !self.guard.is_forwardable(&message.topic) {
            debug!(
                "Bridge {}: loop guard skipped '{}'",
                Direction::Outbound,
                message.topic
            );
            if let Some(ref m) = self.metrics {
                m.loop_guard_rejected();
            }
            return Ok(Outbound::LoopGuarded);
        }

        let codec = self.fanout.codec();
        let envelope = codec.decode_from_local(&message.topic, &message.payload)?;
        let wire = codec.encode_for_cloud(&envelope.topic, &envelope.data)?;
        cloud.send_message(wire).await?;

        debug!("Bridge {}: forwarded '{}'", Direction::Outbound, message.topic);
        if let Some(ref m) = self.metrics {
            m.forwarded_to_cloud();
        }
        Ok(Outbound::Sent)
    }

    /// Handle one cloud message: republish locally while fanning out
    pub async fn forward_inbound<P: LocalPublisher + ?Sized>(
        &self,
        message: &InboundMessage,
        local: &P,
    ) -> Result<Envelope, ForwardError> {
        let body = std::str::from_utf8(&message.payload).map_err(|_| {
            ForwardError::Envelope(EnvelopeError::InvalidUtf8 {
                topic: message.topic.clone(),
            })
        })?;
        let envelope = self.fanout.codec().decode_from_cloud(body);
        let local_topic = with_namespace(&self.inbound_prefix, &envelope.topic);

        let publish = async {
            if validate_topic_name(&local_topic).is_err() {
                return Err(ForwardError::InvalidTopic(local_topic.clone()));
            }
            local
                .publish(&local_topic, Bytes::from(envelope.data.clone()), self.qos)
                .await
                .map_err(ForwardError::from)
        };
        let (published, _report) = tokio::join!(publish, self.fanout.deliver(&envelope));
        published?;

        debug!(
            "Bridge {}: published '{}'",
            Direction::Inbound,
            local_topic
        );
        if let Some(ref m) = self.metrics {
            m.published_local();
        }
        Ok(envelope)
    }

    /// Run the local -> cloud loop until shutdown or a terminal error
    pub async fn run_outbound<S, C>(
        &self,
        source: &mut S,
        cloud: &C,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<PumpStats, PumpError>
    where
        S: MessageSource + ?Sized,
        C: CloudSender + ?Sized,
    {
        self.run_direction(Direction::Outbound, source, shutdown, |message| async move {
            self.forward_outbound(&message, cloud)
                .await
                .map(|outcome| outcome == Outbound::Sent)
        })
        .await
    }

    /// Run the cloud -> local loop until shutdown or a terminal error
    pub async fn run_inbound<S, P>(
        &self,
        source: &mut S,
        local: &P,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<PumpStats, PumpError>
    where
        S: MessageSource + ?Sized,
        P: LocalPublisher + ?Sized,
    {
        self.run_direction(Direction::Inbound, source, shutdown, |message| async move {
            self.forward_inbound(&message, local).await.map(|_| true)
        })
        .await
    }

    /// Run both directions concurrently; each reports its own outcome
    pub async fn run<LS, LP, CS, CC>(
        &self,
        local_source: &mut LS,
        local: &LP,
        cloud_source: &mut CS,
        cloud: &CC,
        shutdown: &broadcast::Sender<()>,
    ) -> PumpReport
    where
        LS: MessageSource + ?Sized,
        LP: LocalPublisher + ?Sized,
        CS: MessageSource + ?Sized,
        CC: CloudSender + ?Sized,
    {
        info!("Bridge: pumps started");
        let (outbound, inbound) = tokio::join!(
            self.run_outbound(local_source, cloud, shutdown.subscribe()),
            self.run_inbound(cloud_source, local, shutdown.subscribe()),
        );
        PumpReport { outbound, inbound }
    }

    async fn run_direction<S, F, Fut>(
        &self,
        direction: Direction,
        source: &mut S,
        mut shutdown: broadcast::Receiver<()>,
        mut forward: F,
    ) -> Result<PumpStats, PumpError>
    where
        S: MessageSource + ?Sized,
        F: FnMut(InboundMessage) -> Fut,
        Fut: std::future::Future<Output = Result<bool, ForwardError>>,
    {
        let mut stats = PumpStats::default();
        let mut consecutive = 0u32;

        loop {
            let received = tokio::select! {
                received = source.next_message() => received,
                _ = shutdown.recv() => {
                    info!("Bridge {}: stopped ({:?})", direction, stats);
                    return Ok(stats);
                }
            };

            let failure = match received {
                Ok(message) => match forward(message).await {
                    Ok(true) => {
                        stats.forwarded += 1;
                        consecutive = 0;
                        continue;
                    }
                    Ok(false) => {
                        stats.skipped += 1;
                        continue;
                    }
                    Err(ForwardError::Channel(e)) => e,
                    Err(e) => {
                        // Only this message is affected
                        warn!("Bridge {}: dropping message: {}", direction, e);
                        stats.dropped += 1;
                        if let Some(ref m) = self.metrics {
                            m.message_dropped(e.reason());
                        }
                        continue;
                    }
                },
                Err(e) => e,
            };

            if failure.is_connection_lost() {
                error!("Bridge {}: connection lost: {}", direction, failure);
                return Err(PumpError::ConnectionLost {
                    direction,
                    reason: failure.to_string(),
                });
            }

            warn!("Bridge {}: dropping message: {}", direction, failure);
            stats.dropped += 1;
            consecutive += 1;
            if let Some(ref m) = self.metrics {
                m.message_dropped("send_error");
            }

            if self.max_consecutive_failures > 0 && consecutive >= self.max_consecutive_failures {
                error!(
                    "Bridge {}: giving up after {} consecutive failures",
                    direction, consecutive
                );
                return Err(PumpError::TooManyFailures {
                    direction,
                    failures: consecutive,
                    last: failure,
                });
            }
        }
    }
}
