//! Codec tests

use bytes::{Bytes, BytesMut};

use super::*;
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, Packet, PubAck, Publish, QoS, SubAck, Subscribe,
};

fn encode(packet: &Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    Encoder::new().encode(packet, &mut buf).unwrap();
    buf
}

#[test]
fn test_variable_int_boundaries() {
    for value in [0u32, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152] {
        let mut buf = BytesMut::new();
        let written = write_variable_int(&mut buf, value).unwrap();
        let (decoded, consumed) = read_variable_int(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, written);
    }
}

#[test]
fn test_variable_int_too_many_bytes() {
    let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
    assert_eq!(
        read_variable_int(&buf),
        Err(DecodeError::InvalidRemainingLength)
    );
}

#[test]
fn test_connect_wire_layout() {
    let packet = Packet::Connect(Box::new(Connect {
        client_id: "c1".to_string(),
        clean_session: true,
        keep_alive: 30,
        username: Some("u".to_string()),
        password: Some(Bytes::from_static(b"p")),
    }));
    let buf = encode(&packet);

    assert_eq!(buf[0], 0x10);
    // "MQTT" + level 4 + flags (username | password | clean session)
    assert_eq!(&buf[2..8], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);
    assert_eq!(buf[8], 4);
    assert_eq!(buf[9], 0xC2);
    assert_eq!(&buf[10..12], &[0x00, 30]);

    let (decoded, consumed) = Decoder::new().decode(&buf).unwrap().unwrap();
    assert_eq!(consumed, buf.len());
    assert_eq!(decoded, packet);
}

#[test]
fn test_publish_qos1_carries_packet_id() {
    let packet = Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: "out/sensors/livingroom".to_string(),
        packet_id: Some(7),
        payload: Bytes::from_static(b"23.5"),
    });
    let buf = encode(&packet);
    assert_eq!(buf[0], 0x32);

    let (decoded, _) = Decoder::new().decode(&buf).unwrap().unwrap();
    match decoded {
        Packet::Publish(p) => {
            assert_eq!(p.packet_id, Some(7));
            assert_eq!(p.topic, "out/sensors/livingroom");
            assert_eq!(&p.payload[..], b"23.5");
        }
        other => panic!("Expected PUBLISH, got {:?}", other),
    }
}

#[test]
fn test_partial_packet_returns_none() {
    let packet = Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtMostOnce,
        retain: false,
        topic: "a/b".to_string(),
        packet_id: None,
        payload: Bytes::from_static(b"hello world"),
    });
    let buf = encode(&packet);
    let decoder = Decoder::new();

    for cut in 0..buf.len() {
        assert!(decoder.decode(&buf[..cut]).unwrap().is_none());
    }
    assert!(decoder.decode(&buf).unwrap().is_some());
}

#[test]
fn test_back_to_back_packets() {
    let mut buf = encode(&Packet::ConnAck(ConnAck {
        session_present: false,
        return_code: ConnectReturnCode::Accepted,
    }));
    buf.extend_from_slice(&encode(&Packet::SubAck(SubAck {
        packet_id: 1,
        return_codes: vec![1],
    })));
    buf.extend_from_slice(&encode(&Packet::PubAck(PubAck { packet_id: 9 })));

    let decoder = Decoder::new();
    let mut pos = 0;
    let mut types = Vec::new();
    while let Some((packet, used)) = decoder.decode(&buf[pos..]).unwrap() {
        types.push(packet.packet_type());
        pos += used;
    }
    assert_eq!(types, vec![2, 9, 4]);
    assert_eq!(pos, buf.len());
}

#[test]
fn test_subscribe_requires_reserved_flags() {
    let buf = encode(&Packet::Subscribe(Subscribe {
        packet_id: 3,
        filters: vec![("azure/#".to_string(), QoS::AtLeastOnce)],
    }));
    assert_eq!(buf[0], 0x82);
    assert!(Decoder::new().decode(&buf).unwrap().is_some());

    let mut bad = buf.clone();
    bad[0] = 0x80;
    assert_eq!(Decoder::new().decode(&bad), Err(DecodeError::InvalidFlags));
}

#[test]
fn test_connack_refused_code() {
    let buf = [0x20, 0x02, 0x00, 0x05];
    match Decoder::new().decode(&buf).unwrap() {
        Some((Packet::ConnAck(ack), 4)) => {
            assert_eq!(ack.return_code, ConnectReturnCode::NotAuthorized)
        }
        other => panic!("Expected CONNACK, got {:?}", other),
    }
}

#[test]
fn test_packet_size_limit() {
    let decoder = Decoder::new().with_max_packet_size(4);
    let buf = encode(&Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtMostOnce,
        retain: false,
        topic: "topic".to_string(),
        packet_id: None,
        payload: Bytes::from_static(b"payload"),
    }));
    assert_eq!(decoder.decode(&buf), Err(DecodeError::PacketTooLarge));
}

#[test]
fn test_unknown_packet_type() {
    let buf = [0xF0, 0x00];
    assert_eq!(
        Decoder::new().decode(&buf),
        Err(DecodeError::InvalidPacketType(15))
    );
}
