//! MQTT Packet Decoder

use bytes::Bytes;

use super::{read_binary, read_string, read_u16, read_variable_int, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, Packet, PubAck, Publish, QoS, SubAck,
    Subscribe,
};

/// MQTT v3.1.1 Packet Decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum packet size
    max_packet_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(super::MAX_REMAINING_LENGTH);
        self
    }

    /// Decode a packet from the buffer
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a packet, or
    /// `(packet, bytes_consumed)` once a full packet is available.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let body = &buf[1 + len_bytes..total_len];

        let packet = match packet_type {
            1 => self.decode_connect(body)?,
            2 => self.decode_connack(flags, body)?,
            3 => self.decode_publish(flags, body)?,
            4 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlags);
                }
                Packet::PubAck(PubAck {
                    packet_id: read_u16(body)?,
                })
            }
            8 => self.decode_subscribe(flags, body)?,
            9 => self.decode_suback(flags, body)?,
            12 | 13 | 14 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlags);
                }
                match packet_type {
                    12 => Packet::PingReq,
                    13 => Packet::PingResp,
                    _ => Packet::Disconnect,
                }
            }
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }

    fn decode_connect(&self, body: &[u8]) -> Result<Packet, DecodeError> {
        let mut pos = 0;

        let (protocol_name, len) = read_string(body)?;
        pos += len;
        if protocol_name != "MQTT" {
            return Err(DecodeError::MalformedPacket("invalid protocol name"));
        }

        if pos + 4 > body.len() {
            return Err(DecodeError::InsufficientData);
        }
        // protocol level byte is not validated: the fake brokers accept any
        let connect_flags = body[pos + 1];
        let keep_alive = u16::from_be_bytes([body[pos + 2], body[pos + 3]]);
        pos += 4;

        if (connect_flags & 0x01) != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let (client_id, len) = read_string(&body[pos..])?;
        pos += len;

        // Will flag is never set by this client
        if (connect_flags & 0x04) != 0 {
            return Err(DecodeError::MalformedPacket("will messages are not supported"));
        }

        let username = if (connect_flags & 0x80) != 0 {
            let (username, len) = read_string(&body[pos..])?;
            pos += len;
            Some(username.to_string())
        } else {
            None
        };

        let password = if (connect_flags & 0x40) != 0 {
            let (password, _) = read_binary(&body[pos..])?;
            Some(Bytes::copy_from_slice(password))
        } else {
            None
        };

        Ok(Packet::Connect(Box::new(Connect {
            client_id: client_id.to_string(),
            clean_session: (connect_flags & 0x02) != 0,
            keep_alive,
            username,
            password,
        })))
    }

    fn decode_connack(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        if body.len() < 2 {
            return Err(DecodeError::InsufficientData);
        }

        let return_code = ConnectReturnCode::from_u8(body[1])
            .ok_or(DecodeError::InvalidReturnCode(body[1]))?;

        Ok(Packet::ConnAck(ConnAck {
            session_present: (body[0] & 0x01) != 0,
            return_code,
        }))
    }

    fn decode_publish(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;
        let retain = (flags & 0x01) != 0;

        let (topic, mut pos) = read_string(body)?;

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&body[pos..])?;
            pos += 2;
            Some(id)
        } else {
            None
        };

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::copy_from_slice(&body[pos..]),
        }))
    }

    fn decode_subscribe(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0x02 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(body)?;
        let mut pos = 2;
        let mut filters = Vec::new();

        while pos < body.len() {
            let (filter, len) = read_string(&body[pos..])?;
            pos += len;
            let qos_byte = *body.get(pos).ok_or(DecodeError::InsufficientData)?;
            pos += 1;
            let qos = QoS::from_u8(qos_byte).ok_or(DecodeError::InvalidQoS(qos_byte))?;
            filters.push((filter.to_string(), qos));
        }

        if filters.is_empty() {
            return Err(DecodeError::MalformedPacket("SUBSCRIBE without filters"));
        }

        Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
    }

    fn decode_suback(&self, flags: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(body)?;
        Ok(Packet::SubAck(SubAck {
            packet_id,
            return_codes: body[2..].to_vec(),
        }))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
