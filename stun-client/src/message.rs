//! Minimal STUN (RFC 5389) message codec.
//!
//! Only what a Binding transaction needs is modelled: the request carries no
//! attributes, and responses are searched for a mapped address or an error code.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::error::{Result, StunError};

/// Fixed header size of every STUN message
const HEADER_SIZE: usize = 20;

/// Magic cookie value (RFC 5389 section 6)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_ERROR_CODE: u16 = 0x0009;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// STUN message types used by a Binding transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    BindingRequest,
    BindingSuccess,
    BindingError,
    Other(u16),
}

impl MessageType {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingSuccess => 0x0101,
            Self::BindingError => 0x0111,
            Self::Other(value) => value,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => Self::BindingRequest,
            0x0101 => Self::BindingSuccess,
            0x0111 => Self::BindingError,
            other => Self::Other(other),
        }
    }
}

/// A single type-length-value attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u16,
    pub value: Bytes,
}

impl Attribute {
    /// Build an XOR-MAPPED-ADDRESS attribute for `addr`.
    pub fn xor_mapped_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> Self {
        let mut value = BytesMut::with_capacity(20);
        value.put_u8(0);
        let xor_port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
        match addr.ip() {
            IpAddr::V4(ip) => {
                value.put_u8(FAMILY_IPV4);
                value.put_u16(xor_port);
                value.put_u32(u32::from(ip) ^ MAGIC_COOKIE);
            }
            IpAddr::V6(ip) => {
                value.put_u8(FAMILY_IPV6);
                value.put_u16(xor_port);
                value.put_slice(&xor_v6(ip.octets(), transaction_id));
            }
        }
        Self {
            attr_type: ATTR_XOR_MAPPED_ADDRESS,
            value: value.freeze(),
        }
    }
}

/// A decoded or to-be-encoded STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    pub msg_type: MessageType,
    pub transaction_id: [u8; 12],
    pub attributes: Vec<Attribute>,
}

impl StunMessage {
    /// New Binding request with a random transaction id
    pub fn binding_request() -> Self {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill(&mut transaction_id);
        Self {
            msg_type: MessageType::BindingRequest,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Binding success answering `request`, reporting `mapped` as the reflexive address
    pub fn binding_success(request: &StunMessage, mapped: SocketAddr) -> Self {
        Self {
            msg_type: MessageType::BindingSuccess,
            transaction_id: request.transaction_id,
            attributes: vec![Attribute::xor_mapped_address(mapped, &request.transaction_id)],
        }
    }

    pub fn encode(&self) -> Bytes {
        let body_len: usize = self
            .attributes
            .iter()
            .map(|attr| 4 + padded(attr.value.len()))
            .sum();

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
        buf.put_u16(self.msg_type.to_u16());
        buf.put_u16(body_len as u16);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&self.transaction_id);

        for attr in &self.attributes {
            buf.put_u16(attr.attr_type);
            buf.put_u16(attr.value.len() as u16);
            buf.put_slice(&attr.value);
            buf.put_bytes(0, padded(attr.value.len()) - attr.value.len());
        }

        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::ProtocolError("packet shorter than STUN header".to_string()));
        }
        if bytes[0] & 0xC0 != 0 {
            return Err(StunError::ProtocolError("leading bits are not zero".to_string()));
        }

        let msg_type = MessageType::from_u16(u16::from_be_bytes([bytes[0], bytes[1]]));
        let body_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(StunError::ProtocolError("invalid magic cookie".to_string()));
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&bytes[8..HEADER_SIZE]);

        let end = HEADER_SIZE + body_len;
        if bytes.len() < end {
            return Err(StunError::ProtocolError("truncated attribute section".to_string()));
        }

        let mut attributes = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset + 4 <= end {
            let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let len = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            offset += 4;
            if offset + len > end {
                return Err(StunError::ProtocolError(format!(
                    "attribute 0x{:04x} overruns message",
                    attr_type
                )));
            }
            attributes.push(Attribute {
                attr_type,
                value: Bytes::copy_from_slice(&bytes[offset..offset + len]),
            });
            offset += padded(len);
        }

        Ok(Self {
            msg_type,
            transaction_id,
            attributes,
        })
    }

    fn attribute(&self, attr_type: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.attr_type == attr_type)
    }

    /// Server-reflexive address, preferring XOR-MAPPED-ADDRESS over MAPPED-ADDRESS.
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        if let Some(attr) = self.attribute(ATTR_XOR_MAPPED_ADDRESS) {
            return decode_address(&attr.value, Some(&self.transaction_id));
        }
        self.attribute(ATTR_MAPPED_ADDRESS)
            .and_then(|attr| decode_address(&attr.value, None))
    }

    /// ERROR-CODE as `(code, reason)`, if present.
    pub fn error_code(&self) -> Option<(u16, String)> {
        let value = &self.attribute(ATTR_ERROR_CODE)?.value;
        if value.len() < 4 {
            return None;
        }
        let code = (value[2] & 0x07) as u16 * 100 + value[3] as u16;
        let reason = String::from_utf8_lossy(&value[4..]).into_owned();
        Some((code, reason))
    }
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn xor_v6(octets: [u8; 16], transaction_id: &[u8; 12]) -> [u8; 16] {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut out = [0u8; 16];
    for i in 0..16 {
        let mask = if i < 4 { cookie[i] } else { transaction_id[i - 4] };
        out[i] = octets[i] ^ mask;
    }
    out
}

/// Decode a (XOR-)MAPPED-ADDRESS value. `transaction_id` is `Some` for the XOR form.
fn decode_address(value: &[u8], transaction_id: Option<&[u8; 12]>) -> Option<SocketAddr> {
    if value.len() < 4 {
        return None;
    }
    let family = value[1];
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if transaction_id.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match family {
        FAMILY_IPV4 if value.len() >= 8 => {
            let mut raw = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
            if transaction_id.is_some() {
                raw ^= MAGIC_COOKIE;
            }
            IpAddr::V4(Ipv4Addr::from(raw))
        }
        FAMILY_IPV6 if value.len() >= 20 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            if let Some(tid) = transaction_id {
                octets = xor_v6(octets, tid);
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_request_header() {
        let request = StunMessage::binding_request();
        let bytes = request.encode();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..2], &[0x00, 0x01]);
        assert_eq!(&bytes[2..4], &[0x00, 0x00]);
        assert_eq!(&bytes[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&bytes[8..20], &request.transaction_id);
    }

    #[test]
    fn test_xor_mapped_ipv4_known_vector() {
        // RFC 5769 sample: 192.0.2.1:32853
        let tid = [0xb7, 0xe7, 0xa7, 0x01, 0xbc, 0x34, 0xd6, 0x86, 0xfa, 0x87, 0xdf, 0xae];
        let value = [0x00, 0x01, 0xa1, 0x47, 0xe1, 0x12, 0xa6, 0x43];
        let addr = decode_address(&value, Some(&tid)).unwrap();
        assert_eq!(addr, "192.0.2.1:32853".parse().unwrap());
    }

    #[test]
    fn test_success_response_carries_mapped_address() {
        let request = StunMessage::binding_request();
        let mapped: SocketAddr = "203.0.113.7:40000".parse().unwrap();
        let response = StunMessage::binding_success(&request, mapped);

        let decoded = StunMessage::decode(&response.encode()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::BindingSuccess);
        assert_eq!(decoded.transaction_id, request.transaction_id);
        assert_eq!(decoded.mapped_address(), Some(mapped));
    }

    #[test]
    fn test_ipv6_mapped_address() {
        let request = StunMessage::binding_request();
        let mapped: SocketAddr = "[2001:db8::1]:5060".parse().unwrap();
        let response = StunMessage::binding_success(&request, mapped);
        let decoded = StunMessage::decode(&response.encode()).unwrap();
        assert_eq!(decoded.mapped_address(), Some(mapped));
    }

    #[test]
    fn test_plain_mapped_address_fallback() {
        let msg = StunMessage {
            msg_type: MessageType::BindingSuccess,
            transaction_id: [0; 12],
            attributes: vec![Attribute {
                attr_type: ATTR_MAPPED_ADDRESS,
                value: Bytes::from_static(&[0, 1, 0x13, 0xc4, 10, 0, 0, 5]),
            }],
        };
        assert_eq!(msg.mapped_address(), Some("10.0.0.5:5060".parse().unwrap()));
    }

    #[test]
    fn test_error_code_attribute() {
        let msg = StunMessage {
            msg_type: MessageType::BindingError,
            transaction_id: [0; 12],
            attributes: vec![Attribute {
                attr_type: ATTR_ERROR_CODE,
                value: Bytes::from_static(b"\x00\x00\x04\x00Bad Request"),
            }],
        };
        assert_eq!(msg.error_code(), Some((400, "Bad Request".to_string())));
    }

    #[test]
    fn test_decode_rejects_bad_cookie() {
        let mut bytes = StunMessage::binding_request().encode().to_vec();
        bytes[4] = 0;
        assert!(StunMessage::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_short_packet() {
        assert!(StunMessage::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_decode_rejects_overrunning_attribute() {
        let mut bytes = StunMessage::binding_request().encode().to_vec();
        bytes[3] = 8;
        bytes.extend_from_slice(&[0x00, 0x20, 0x00, 0x40, 0, 0, 0, 0]);
        assert!(StunMessage::decode(&bytes).is_err());
    }
}
