use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::*;
use crate::codec::{Decoder, Encoder};
use crate::protocol::{ConnAck, ConnectReturnCode, Packet, PubAck, Publish, QoS, SubAck};
use crate::remote::{ChannelStatus, MessageSource};
use crate::transport::Endpoint;

/// Minimal broker side of one connection
struct FakeBroker {
    stream: TcpStream,
    buf: BytesMut,
}

impl FakeBroker {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn read(&mut self) -> Packet {
        loop {
            if let Some((packet, used)) = Decoder::new().decode(&self.buf).unwrap() {
                self.buf.advance(used);
                return packet;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "client closed the connection");
        }
    }

    async fn write(&mut self, packet: Packet) {
        let mut out = BytesMut::new();
        Encoder::new().encode(&packet, &mut out).unwrap();
        self.stream.write_all(&out).await.unwrap();
    }

    async fn accept_session(&mut self, return_code: ConnectReturnCode) {
        assert!(matches!(self.read().await, Packet::Connect(_)));
        self.write(Packet::ConnAck(ConnAck {
            session_present: false,
            return_code,
        }))
        .await;
    }
}

async fn listener() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let endpoint = Endpoint {
        host: "127.0.0.1".to_string(),
        port,
        tls: None,
        connect_timeout: Duration::from_secs(2),
    };
    (listener, endpoint)
}

#[tokio::test]
async fn test_connect_and_subscribe() {
    let (listener, endpoint) = listener().await;

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        let connect = match broker.read().await {
            Packet::Connect(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(connect.client_id, "bridge-test");
        assert_eq!(connect.username.as_deref(), Some("user"));
        broker
            .write(Packet::ConnAck(ConnAck {
                session_present: false,
                return_code: ConnectReturnCode::Accepted,
            }))
            .await;

        let subscribe = match broker.read().await {
            Packet::Subscribe(s) => s,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(subscribe.filters, vec![("out/#".to_string(), QoS::AtLeastOnce)]);
        broker
            .write(Packet::SubAck(SubAck {
                packet_id: subscribe.packet_id,
                return_codes: vec![1],
            }))
            .await;
        broker
    });

    let mut options = MqttOptions::new("local", endpoint, "bridge-test");
    options.username = Some("user".to_string());
    options.subscriptions = vec![("out/#".to_string(), QoS::AtLeastOnce)];

    let (handle, _messages) = connect(options).await.unwrap();
    assert_eq!(handle.status(), ChannelStatus::Connected);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connack_refused() {
    let (listener, endpoint) = listener().await;

    tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker
            .accept_session(ConnectReturnCode::NotAuthorized)
            .await;
        // Hold the socket until the client gives up
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let options = MqttOptions::new("cloud", endpoint, "device-1");
    let err = connect(options).await.err().unwrap();
    assert!(matches!(err, crate::remote::ChannelError::Rejected(_)));
}

#[tokio::test]
async fn test_subscription_refused() {
    let (listener, endpoint) = listener().await;

    tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.accept_session(ConnectReturnCode::Accepted).await;
        if let Packet::Subscribe(s) = broker.read().await {
            broker
                .write(Packet::SubAck(SubAck {
                    packet_id: s.packet_id,
                    return_codes: vec![0x80],
                }))
                .await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let mut options = MqttOptions::new("local", endpoint, "bridge");
    options.subscriptions = vec![("forbidden/#".to_string(), QoS::AtMostOnce)];
    let err = connect(options).await.err().unwrap();
    assert!(matches!(err, crate::remote::ChannelError::Rejected(_)));
}

#[tokio::test]
async fn test_receive_publish_and_ack() {
    let (listener, endpoint) = listener().await;

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.accept_session(ConnectReturnCode::Accepted).await;
        broker
            .write(Packet::Publish(Publish {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: false,
                topic: "devices/d1/messages/devicebound/x".to_string(),
                packet_id: Some(7),
                payload: Bytes::from_static(b"{\"topic\":\"a\"}"),
            }))
            .await;
        match broker.read().await {
            Packet::PubAck(ack) => assert_eq!(ack.packet_id, 7),
            other => panic!("expected PUBACK, got {:?}", other),
        }
        broker
    });

    let options = MqttOptions::new("cloud", endpoint, "d1");
    let (_handle, mut messages) = connect(options).await.unwrap();

    let message = messages.next_message().await.unwrap();
    assert_eq!(message.topic, "devices/d1/messages/devicebound/x");
    assert_eq!(&message.payload[..], b"{\"topic\":\"a\"}");
    broker.await.unwrap();
}

#[tokio::test]
async fn test_publish_qos1_waits_for_puback() {
    let (listener, endpoint) = listener().await;

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.accept_session(ConnectReturnCode::Accepted).await;
        let publish = match broker.read().await {
            Packet::Publish(p) => p,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(publish.topic, "from-cloud/telemetry");
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        let packet_id = publish.packet_id.unwrap();
        assert_ne!(packet_id, 0);
        broker.write(Packet::PubAck(PubAck { packet_id })).await;
        broker
    });

    let options = MqttOptions::new("local", endpoint, "bridge");
    let (handle, _messages) = connect(options).await.unwrap();

    handle
        .publish(
            "from-cloud/telemetry",
            Bytes::from_static(b"22.5"),
            QoS::AtLeastOnce,
        )
        .await
        .unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_publish_times_out_without_puback() {
    let (listener, endpoint) = listener().await;

    tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.accept_session(ConnectReturnCode::Accepted).await;
        let _ = broker.read().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut options = MqttOptions::new("local", endpoint, "bridge");
    options.ack_timeout = Duration::from_millis(100);
    let (handle, _messages) = connect(options).await.unwrap();

    let err = handle
        .publish("t", Bytes::from_static(b"x"), QoS::AtLeastOnce)
        .await
        .unwrap_err();
    assert_eq!(err, crate::remote::ChannelError::Timeout);
}

#[tokio::test]
async fn test_connection_lost_is_reported() {
    let (listener, endpoint) = listener().await;

    tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.accept_session(ConnectReturnCode::Accepted).await;
        // Dropping the broker closes the socket
    });

    let options = MqttOptions::new("local", endpoint, "bridge");
    let (handle, mut messages) = connect(options).await.unwrap();

    let err = messages.next_message().await.unwrap_err();
    assert!(err.is_connection_lost());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.status(), ChannelStatus::Disconnected);
    let err = handle
        .publish("t", Bytes::from_static(b"x"), QoS::AtMostOnce)
        .await
        .unwrap_err();
    assert!(err.is_connection_lost());
}

#[tokio::test]
async fn test_disconnect_sends_packet() {
    let (listener, endpoint) = listener().await;

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.accept_session(ConnectReturnCode::Accepted).await;
        assert!(matches!(broker.read().await, Packet::Disconnect));
    });

    let options = MqttOptions::new("local", endpoint, "bridge");
    let (handle, _messages) = connect(options).await.unwrap();
    handle.disconnect().await;
    broker.await.unwrap();
}

#[tokio::test]
async fn test_full_inbound_queue_does_not_block_publishes() {
    let (listener, endpoint) = listener().await;

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.accept_session(ConnectReturnCode::Accepted).await;
        for i in 0..3 {
            broker
                .write(Packet::Publish(Publish {
                    dup: false,
                    qos: QoS::AtMostOnce,
                    retain: false,
                    topic: format!("out/sensor/{}", i),
                    packet_id: None,
                    payload: Bytes::from_static(b"1"),
                }))
                .await;
        }
        let publish = match broker.read().await {
            Packet::Publish(p) => p,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(publish.topic, "from-cloud/lamp");
        broker
            .write(Packet::PubAck(PubAck {
                packet_id: publish.packet_id.unwrap(),
            }))
            .await;
        broker
    });

    let mut options = MqttOptions::new("local", endpoint, "bridge");
    options.inbound_capacity = 1;
    options.ack_timeout = Duration::from_secs(2);
    let (handle, mut messages) = connect(options).await.unwrap();

    // Let the unread publishes arrive and fill the queue
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle
        .publish("from-cloud/lamp", Bytes::from_static(b"on"), QoS::AtLeastOnce)
        .await
        .unwrap();

    let first = messages.next_message().await.unwrap();
    assert_eq!(first.topic, "out/sensor/0");
    let _broker = broker.await.unwrap();
}
