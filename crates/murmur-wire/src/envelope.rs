//! Envelope encoding and classification

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use murmur_core::{MurmurError, MurmurResult, Origin, Rumor, SeqNo, StatusVector};

use crate::AddressedPayload;

/// Largest datagram the engine sends or accepts
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Longest origin name accepted on the wire, in bytes
pub const MAX_ORIGIN_LEN: usize = 256;

/// The last hop with the longest encoding
const WIDEST_LAST_HOP: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, u16::MAX));

const KEY_DEST: &str = "Dest";
const KEY_WANT: &str = "Want";
const KEY_ORIGIN: &str = "Origin";

/// One decoded datagram
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Rumor(Rumor),
    Status(StatusVector),
    Addressed(AddressedPayload),
}

#[derive(Serialize, Deserialize)]
struct RumorWire {
    #[serde(rename = "Origin")]
    origin: String,
    #[serde(rename = "SeqNo")]
    seq_no: u32,
    #[serde(rename = "ChatText", default, skip_serializing_if = "Option::is_none")]
    chat_text: Option<String>,
    #[serde(rename = "LastIP", default, skip_serializing_if = "Option::is_none")]
    last_ip: Option<u32>,
    #[serde(rename = "LastPort", default, skip_serializing_if = "Option::is_none")]
    last_port: Option<u16>,
}

#[derive(Serialize, Deserialize)]
struct StatusWire {
    #[serde(rename = "Want")]
    want: BTreeMap<String, u32>,
}

#[derive(Serialize, Deserialize)]
struct AddressedWire {
    #[serde(rename = "Dest")]
    dest: String,
    #[serde(rename = "HopLimit")]
    hop_limit: u32,
    #[serde(rename = "Origin", default, skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Envelope {
    /// Decode a datagram.
    ///
    /// Classification looks at `Dest` first, then `Want`, then `Origin`, so
    /// an addressed payload that also names its sender is never mistaken
    /// for a rumor.
    pub fn decode(buf: &[u8]) -> MurmurResult<Self> {
        if buf.len() > MAX_DATAGRAM_SIZE {
            return Err(MurmurError::DatagramTooLarge {
                size: buf.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let value: Value = serde_json::from_slice(buf).map_err(invalid)?;
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(MurmurError::InvalidWireFormat(format!(
                    "expected a map, got {}",
                    json_kind(&other)
                )))
            }
        };

        if map.contains_key(KEY_DEST) {
            let wire: AddressedWire = serde_json::from_value(Value::Object(map)).map_err(invalid)?;
            Self::from_addressed_wire(wire)
        } else if map.contains_key(KEY_WANT) {
            let wire: StatusWire = serde_json::from_value(Value::Object(map)).map_err(invalid)?;
            Self::from_status_wire(wire)
        } else if map.contains_key(KEY_ORIGIN) {
            let wire: RumorWire = serde_json::from_value(Value::Object(map)).map_err(invalid)?;
            Self::from_rumor_wire(wire)
        } else {
            Err(MurmurError::UnknownEnvelope)
        }
    }

    /// Encode for transmission.
    ///
    /// A rumor's last hop can only be expressed for IPv4 peers; any other
    /// last hop is left off the wire.
    pub fn encode(&self) -> MurmurResult<Vec<u8>> {
        let bytes = match self {
            Envelope::Rumor(rumor) => {
                let (last_ip, last_port) = match rumor.last_hop.and_then(ipv4_of) {
                    Some(v4) => (Some(u32::from(*v4.ip())), Some(v4.port())),
                    None => (None, None),
                };
                serde_json::to_vec(&RumorWire {
                    origin: rumor.origin.as_str().to_string(),
                    seq_no: rumor.seq.value(),
                    chat_text: rumor.body.clone(),
                    last_ip,
                    last_port,
                })
            }
            Envelope::Status(status) => serde_json::to_vec(&StatusWire {
                want: status
                    .iter()
                    .map(|(origin, seq)| (origin.as_str().to_string(), seq.value()))
                    .collect(),
            }),
            Envelope::Addressed(payload) => serde_json::to_vec(&AddressedWire {
                dest: payload.dest.as_str().to_string(),
                hop_limit: payload.hop_limit,
                origin: payload.origin.as_ref().map(|o| o.as_str().to_string()),
                fields: payload.fields.clone(),
            }),
        }
        .map_err(invalid)?;

        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(MurmurError::DatagramTooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Rumor(r) if r.is_route() => "route-rumor",
            Envelope::Rumor(_) => "rumor",
            Envelope::Status(_) => "status",
            Envelope::Addressed(_) => "addressed",
        }
    }

    fn from_rumor_wire(wire: RumorWire) -> MurmurResult<Self> {
        check_origin(&wire.origin, KEY_ORIGIN)?;
        let seq = SeqNo::new(wire.seq_no);
        if !seq.is_valid() {
            return Err(MurmurError::InvalidSequence(wire.seq_no));
        }
        let last_hop = match (wire.last_ip, wire.last_port) {
            (Some(ip), Some(port)) => Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(ip),
                port,
            ))),
            (None, None) => None,
            _ => {
                return Err(MurmurError::InvalidWireFormat(
                    "LastIP and LastPort must appear together".into(),
                ))
            }
        };

        Ok(Envelope::Rumor(Rumor {
            origin: Origin::new(wire.origin),
            seq,
            body: wire.chat_text,
            last_hop,
        }))
    }

    fn from_status_wire(wire: StatusWire) -> MurmurResult<Self> {
        let mut status = StatusVector::new();
        for (origin, next) in wire.want {
            check_origin(&origin, "origin in Want")?;
            let seq = SeqNo::new(next);
            if !seq.is_valid() {
                return Err(MurmurError::InvalidSequence(next));
            }
            status.insert(Origin::new(origin), seq);
        }
        Ok(Envelope::Status(status))
    }

    fn from_addressed_wire(wire: AddressedWire) -> MurmurResult<Self> {
        check_origin(&wire.dest, KEY_DEST)?;
        Ok(Envelope::Addressed(AddressedPayload {
            dest: Origin::new(wire.dest),
            hop_limit: wire.hop_limit,
            origin: wire.origin.filter(|o| !o.is_empty()).map(Origin::new),
            fields: wire.fields,
        }))
    }
}

/// Fails unless `rumor` still fits in a datagram after a relay stamps it
/// with a last hop
pub fn check_relayable(rumor: &Rumor) -> MurmurResult<()> {
    let stamped = rumor.clone().with_last_hop(Some(WIDEST_LAST_HOP));
    Envelope::Rumor(stamped).encode().map(|_| ())
}

/// Fails unless a status vector naming every one of `origins` fits in a
/// datagram, however far their sequence numbers grow
pub fn check_status_capacity<'a, I>(origins: I) -> MurmurResult<()>
where
    I: IntoIterator<Item = &'a Origin>,
{
    let widest: StatusVector = origins
        .into_iter()
        .map(|origin| (origin.clone(), SeqNo::new(u32::MAX)))
        .collect();
    Envelope::Status(widest).encode().map(|_| ())
}

fn check_origin(name: &str, field: &str) -> MurmurResult<()> {
    if name.is_empty() {
        return Err(MurmurError::InvalidWireFormat(format!("empty {field}")));
    }
    if name.len() > MAX_ORIGIN_LEN {
        return Err(MurmurError::InvalidWireFormat(format!(
            "{field} longer than {MAX_ORIGIN_LEN} bytes"
        )));
    }
    Ok(())
}

fn ipv4_of(addr: SocketAddr) -> Option<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(v6) => v6
            .ip()
            .to_ipv4_mapped()
            .map(|ip| SocketAddrV4::new(ip, v6.port())),
    }
}

/// Normalise an address so IPv4-mapped IPv6 peers compare equal to the
/// IPv4 form carried in `LastIP`
pub fn canonical_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(ip) => SocketAddr::new(IpAddr::V4(ip), v6.port()),
            None => addr,
        },
        v4 => v4,
    }
}

fn invalid(e: serde_json::Error) -> MurmurError {
    MurmurError::InvalidWireFormat(e.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
