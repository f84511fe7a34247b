//! MQTT client session task

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec::{Decoder, Encoder};
use crate::protocol::{
    ConnectReturnCode, Connect, Packet, PubAck, Publish, QoS, Subscribe, SUBACK_FAILURE,
};
use crate::remote::{
    ChannelError, ChannelStatus, InboundMessage, LocalPublisher, MessageSource,
};
use crate::transport::{self, BoxedStream, Endpoint};

/// Connection parameters for one MQTT session
#[derive(Debug, Clone)]
pub struct MqttOptions {
    /// Name used in log lines ("local", "cloud")
    pub name: String,
    pub endpoint: Endpoint,
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Filters subscribed right after CONNACK
    pub subscriptions: Vec<(String, QoS)>,
    /// How long a QoS 1 publish waits for its PUBACK
    pub ack_timeout: Duration,
    /// Capacity of the inbound message queue; messages beyond it are dropped
    pub inbound_capacity: usize,
    pub max_packet_size: usize,
}

impl MqttOptions {
    pub fn new(name: impl Into<String>, endpoint: Endpoint, client_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint,
            client_id: client_id.into(),
            keep_alive: 60,
            clean_session: true,
            username: None,
            password: None,
            subscriptions: Vec::new(),
            ack_timeout: Duration::from_secs(10),
            inbound_capacity: 1024,
            max_packet_size: crate::codec::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Command sent to the session task
#[derive(Debug)]
enum Command {
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        done: oneshot::Sender<Result<(), ChannelError>>,
    },
    Disconnect,
}

/// Handle for publishing on a live session
#[derive(Clone)]
pub struct MqttHandle {
    name: Arc<str>,
    command_tx: mpsc::Sender<Command>,
    status: Arc<RwLock<ChannelStatus>>,
    ack_timeout: Duration,
}

impl MqttHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.read()
    }

    /// Publish a message, resolving once written (QoS 0) or acknowledged (QoS 1)
    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<(), ChannelError> {
        let (done, wait) = oneshot::channel();
        self.command_tx
            .send(Command::Publish {
                topic: topic.to_string(),
                payload,
                // QoS 2 is never negotiated by this client
                qos: qos.min(QoS::AtLeastOnce),
                done,
            })
            .await
            .map_err(|_| ChannelError::ConnectionLost("session closed".to_string()))?;

        match timeout(self.ack_timeout, wait).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::ConnectionLost("session closed".to_string())),
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    /// Ask the session to send DISCONNECT and close the socket
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(Command::Disconnect).await;
    }
}

#[async_trait]
impl LocalPublisher for MqttHandle {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), ChannelError> {
        MqttHandle::publish(self, topic, payload, qos).await
    }
}

/// Inbound messages of a session
pub struct MqttMessages {
    rx: mpsc::Receiver<Result<InboundMessage, ChannelError>>,
}

impl MqttMessages {
    pub async fn recv(&mut self) -> Result<InboundMessage, ChannelError> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(ChannelError::ConnectionLost("session closed".to_string())),
        }
    }
}

#[async_trait]
impl MessageSource for MqttMessages {
    async fn next_message(&mut self) -> Result<InboundMessage, ChannelError> {
        self.recv().await
    }
}

/// Connect, authenticate and subscribe, then spawn the session task
pub async fn connect(options: MqttOptions) -> Result<(MqttHandle, MqttMessages), ChannelError> {
    let status = Arc::new(RwLock::new(ChannelStatus::Connecting));
    debug!(
        "MQTT '{}': Connecting to {}:{}",
        options.name, options.endpoint.host, options.endpoint.port
    );

    let stream = transport::connect(&options.endpoint).await?;
    let (reader, writer) = tokio::io::split(stream);
    let mut session = Session {
        name: options.name.clone(),
        reader,
        writer,
        encoder: Encoder::new(),
        decoder: Decoder::new().with_max_packet_size(options.max_packet_size),
        read_buf: BytesMut::with_capacity(4096),
        write_buf: BytesMut::with_capacity(1024),
        next_packet_id: 1,
        pending_acks: HashMap::new(),
        early: Vec::new(),
        dropped: 0,
    };

    let handshake = timeout(options.endpoint.connect_timeout, session.handshake(&options));
    match handshake.await {
        Ok(result) => result?,
        Err(_) => return Err(ChannelError::Timeout),
    }

    *status.write() = ChannelStatus::Connected;
    info!("MQTT '{}': Connected as '{}'", options.name, options.client_id);

    let (command_tx, command_rx) = mpsc::channel(1024);
    let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity.max(1));

    let task_status = status.clone();
    let keep_alive = Duration::from_secs(options.keep_alive.max(1) as u64);
    tokio::spawn(async move {
        let name = session.name.clone();
        let result = session.run(command_rx, &inbound_tx, keep_alive).await;
        *task_status.write() = ChannelStatus::Disconnected;
        match result {
            Ok(()) => info!("MQTT '{}': Disconnected gracefully", name),
            Err(e) => {
                error!("MQTT '{}': Session ended: {}", name, e);
                let _ = inbound_tx.send(Err(e)).await;
            }
        }
    });

    let handle = MqttHandle {
        name: Arc::from(options.name.as_str()),
        command_tx,
        status,
        ack_timeout: options.ack_timeout,
    };
    Ok((handle, MqttMessages { rx: inbound_rx }))
}

/// Socket-owning half of a client session
struct Session {
    name: String,
    reader: ReadHalf<BoxedStream>,
    writer: WriteHalf<BoxedStream>,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    next_packet_id: u16,
    /// QoS 1 publishes waiting for PUBACK
    pending_acks: HashMap<u16, oneshot::Sender<Result<(), ChannelError>>>,
    /// Messages received during the handshake
    early: Vec<InboundMessage>,
    /// Inbound messages dropped on a full queue
    dropped: u64,
}

impl Session {
    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        id
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), ChannelError> {
        self.write_buf.clear();
        self.encoder
            .encode(packet, &mut self.write_buf)
            .map_err(|e| ChannelError::Other(format!("Encode error: {}", e)))?;
        self.writer
            .write_all(&self.write_buf)
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
        Ok(())
    }

    /// Read until one complete packet is buffered and return it
    async fn read_packet(&mut self) -> Result<Packet, ChannelError> {
        loop {
            if let Some(packet) = self.try_decode()? {
                return Ok(packet);
            }
            let n = self
                .reader
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
            if n == 0 {
                return Err(ChannelError::ConnectionLost("Connection closed".to_string()));
            }
        }
    }

    fn try_decode(&mut self) -> Result<Option<Packet>, ChannelError> {
        match self.decoder.decode(&self.read_buf) {
            Ok(Some((packet, used))) => {
                self.read_buf.advance(used);
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            // A framing error leaves the stream unrecoverable
            Err(e) => Err(ChannelError::ConnectionLost(format!("Decode error: {}", e))),
        }
    }

    async fn handshake(&mut self, options: &MqttOptions) -> Result<(), ChannelError> {
        let connect = Packet::Connect(Box::new(Connect {
            client_id: options.client_id.clone(),
            clean_session: options.clean_session,
            keep_alive: options.keep_alive,
            username: options.username.clone(),
            password: options.password.as_ref().map(|p| Bytes::from(p.clone())),
        }));
        self.send(&connect).await?;

        match self.read_packet().await? {
            Packet::ConnAck(ack) if ack.return_code == ConnectReturnCode::Accepted => {
                debug!(
                    "MQTT '{}': CONNACK (session_present={})",
                    self.name, ack.session_present
                );
            }
            Packet::ConnAck(ack) => {
                return Err(ChannelError::Rejected(format!(
                    "CONNACK failed: {:?}",
                    ack.return_code
                )));
            }
            other => {
                return Err(ChannelError::Other(format!(
                    "Expected CONNACK, got packet type {}",
                    other.packet_type()
                )));
            }
        }

        if options.subscriptions.is_empty() {
            return Ok(());
        }

        let packet_id = self.next_packet_id();
        self.send(&Packet::Subscribe(Subscribe {
            packet_id,
            filters: options.subscriptions.clone(),
        }))
        .await?;

        loop {
            match self.read_packet().await? {
                Packet::SubAck(ack) if ack.packet_id == packet_id => {
                    if let Some(pos) = ack.return_codes.iter().position(|c| *c == SUBACK_FAILURE) {
                        return Err(ChannelError::Rejected(format!(
                            "subscription to '{}' refused",
                            options.subscriptions[pos].0
                        )));
                    }
                    info!(
                        "MQTT '{}': Subscribed to {} filter(s)",
                        self.name,
                        options.subscriptions.len()
                    );
                    return Ok(());
                }
                // Retained messages may arrive ahead of the SUBACK
                Packet::Publish(publish) => {
                    if publish.qos != QoS::AtMostOnce {
                        if let Some(packet_id) = publish.packet_id {
                            self.send(&Packet::PubAck(PubAck { packet_id })).await?;
                        }
                    }
                    self.early
                        .push(InboundMessage::new(publish.topic, publish.payload));
                }
                _ => {}
            }
        }
    }

    async fn run(
        &mut self,
        mut command_rx: mpsc::Receiver<Command>,
        inbound_tx: &mpsc::Sender<Result<InboundMessage, ChannelError>>,
        keep_alive: Duration,
    ) -> Result<(), ChannelError> {
        let mut keepalive_timer = tokio::time::interval(keep_alive);
        keepalive_timer.reset();

        for message in std::mem::take(&mut self.early) {
            self.deliver(message, inbound_tx);
        }

        let result = loop {
            // Drain packets that are already buffered before waiting again
            while let Some(packet) = self.try_decode()? {
                self.handle_packet(packet, inbound_tx).await?;
            }

            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::Publish { topic, payload, qos, done }) => {
                            self.publish(topic, payload, qos, done).await?;
                        }
                        Some(Command::Disconnect) | None => {
                            let _ = self.send(&Packet::Disconnect).await;
                            let _ = self.writer.shutdown().await;
                            break Ok(());
                        }
                    }
                }

                read = self.reader.read_buf(&mut self.read_buf) => {
                    let n = read.map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
                    if n == 0 {
                        break Err(ChannelError::ConnectionLost("Connection closed".to_string()));
                    }
                }

                _ = keepalive_timer.tick() => {
                    self.send(&Packet::PingReq).await?;
                    self.sweep_abandoned_acks();
                }
            }
        };

        for (_, done) in self.pending_acks.drain() {
            let _ = done.send(Err(ChannelError::ConnectionLost(
                "session closed before PUBACK".to_string(),
            )));
        }
        result
    }

    async fn publish(
        &mut self,
        topic: String,
        payload: Bytes,
        qos: QoS,
        done: oneshot::Sender<Result<(), ChannelError>>,
    ) -> Result<(), ChannelError> {
        let packet_id = (qos != QoS::AtMostOnce).then(|| self.next_packet_id());
        let publish = Packet::Publish(Publish {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id,
            payload,
        });

        if let Err(e) = self.send(&publish).await {
            let _ = done.send(Err(e.clone()));
            return match e {
                ChannelError::ConnectionLost(_) => Err(e),
                // Encoding problems only affect this message
                _ => Ok(()),
            };
        }

        match packet_id {
            Some(id) => {
                self.sweep_abandoned_acks();
                self.pending_acks.insert(id, done);
            }
            None => {
                let _ = done.send(Ok(()));
            }
        }
        Ok(())
    }

    /// Hand a message to the consumer without waiting for it
    ///
    /// The session keeps serving PUBACKs and keepalive for the other
    /// direction, so a full queue drops the message instead.
    fn deliver(
        &mut self,
        message: InboundMessage,
        inbound_tx: &mpsc::Sender<Result<InboundMessage, ChannelError>>,
    ) {
        match inbound_tx.try_send(Ok(message)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Ok(message))) => {
                self.dropped += 1;
                warn!(
                    "MQTT '{}': Inbound queue full, dropping message on '{}' ({} dropped)",
                    self.name, message.topic, self.dropped
                );
            }
            Err(_) => debug!("MQTT '{}': Inbound receiver dropped", self.name),
        }
    }

    /// Forget QoS 1 publishes whose caller already gave up waiting
    fn sweep_abandoned_acks(&mut self) {
        self.pending_acks.retain(|_, done| !done.is_closed());
    }

    async fn handle_packet(
        &mut self,
        packet: Packet,
        inbound_tx: &mpsc::Sender<Result<InboundMessage, ChannelError>>,
    ) -> Result<(), ChannelError> {
        match packet {
            Packet::Publish(publish) => {
                if publish.qos != QoS::AtMostOnce {
                    if let Some(packet_id) = publish.packet_id {
                        self.send(&Packet::PubAck(PubAck { packet_id })).await?;
                    }
                }
                self.deliver(InboundMessage::new(publish.topic, publish.payload), inbound_tx);
            }
            Packet::PubAck(ack) => {
                if let Some(done) = self.pending_acks.remove(&ack.packet_id) {
                    let _ = done.send(Ok(()));
                }
            }
            Packet::PingResp => {
                debug!("MQTT '{}': PINGRESP received", self.name);
            }
            Packet::SubAck(_) => {
                debug!("MQTT '{}': SUBACK received", self.name);
            }
            Packet::Disconnect => {
                warn!("MQTT '{}': Server sent DISCONNECT", self.name);
                return Err(ChannelError::ConnectionLost(
                    "Remote disconnected".to_string(),
                ));
            }
            other => {
                debug!(
                    "MQTT '{}': Ignoring packet type {}",
                    self.name,
                    other.packet_type()
                );
            }
        }
        Ok(())
    }
}
