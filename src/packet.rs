//! Typed description of a packet, decoded from a rendered template.
//!
//! Decoding is lenient: numbers may be given as strings, booleans as numbers or
//! strings, and field names are matched case-insensitively, ignoring `_` and `-`.
//! Null and empty values are treated as absent.

use crate::error::DecodeError;

use serde::de::{self, DeserializeOwned, Deserializer, Unexpected};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpDescription {
    #[serde(rename(deserialize = "srcip"), deserialize_with = "lenient_ipv4")]
    pub src_ip: Option<Ipv4Addr>,
    #[serde(rename(deserialize = "dstip"), deserialize_with = "lenient_ipv4")]
    pub dst_ip: Option<Ipv4Addr>,
    #[serde(deserialize_with = "lenient_uint")]
    pub ttl: u8,
    #[serde(deserialize_with = "lenient_uint")]
    pub tos: u8,
    /// 0 lets the kernel choose
    #[serde(deserialize_with = "lenient_uint")]
    pub id: u16,
}

impl Default for IpDescription {
    fn default() -> Self {
        IpDescription {
            src_ip: None,
            dst_ip: None,
            ttl: 64,
            tos: 0,
            id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpFlags {
    #[serde(deserialize_with = "lenient_bool")]
    pub syn: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub ack: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub fin: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub rst: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub psh: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub urg: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub ece: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub cwr: bool,
}

impl TcpFlags {
    /// Parse a flag string such as "SA" (SYN+ACK)
    pub fn from_letters(letters: &str) -> Option<Self> {
        let mut flags = TcpFlags::default();
        for c in letters.trim().chars() {
            match c.to_ascii_uppercase() {
                'S' => flags.syn = true,
                'A' => flags.ack = true,
                'F' => flags.fin = true,
                'R' => flags.rst = true,
                'P' => flags.psh = true,
                'U' => flags.urg = true,
                'E' => flags.ece = true,
                'C' => flags.cwr = true,
                _ => return None,
            }
        }
        Some(flags)
    }

    pub fn bits(&self) -> u8 {
        use pnet_packet::tcp::TcpFlags as F;
        (self.syn as u8 * F::SYN)
            | (self.ack as u8 * F::ACK)
            | (self.fin as u8 * F::FIN)
            | (self.rst as u8 * F::RST)
            | (self.psh as u8 * F::PSH)
            | (self.urg as u8 * F::URG)
            | (self.ece as u8 * F::ECE)
            | (self.cwr as u8 * F::CWR)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpDescription {
    #[serde(rename(deserialize = "srcport"), deserialize_with = "lenient_opt_uint")]
    pub src_port: Option<u16>,
    #[serde(rename(deserialize = "dstport"), deserialize_with = "lenient_opt_uint")]
    pub dst_port: Option<u16>,
    #[serde(deserialize_with = "lenient_uint")]
    pub seq: u32,
    #[serde(deserialize_with = "lenient_uint")]
    pub ack: u32,
    #[serde(deserialize_with = "lenient_uint")]
    pub window: u16,
    #[serde(deserialize_with = "lenient_uint")]
    pub urgent: u16,
    #[serde(deserialize_with = "tcp_flags")]
    pub flags: TcpFlags,
}

impl Default for TcpDescription {
    fn default() -> Self {
        TcpDescription {
            src_port: None,
            dst_port: None,
            seq: 0,
            ack: 0,
            window: 65535,
            urgent: 0,
            flags: TcpFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpDescription {
    #[serde(rename(deserialize = "srcport"), deserialize_with = "lenient_opt_uint")]
    pub src_port: Option<u16>,
    #[serde(rename(deserialize = "dstport"), deserialize_with = "lenient_opt_uint")]
    pub dst_port: Option<u16>,
}

/// Everything the encoder needs to build one packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketDescription {
    #[serde(deserialize_with = "substructure_or_default")]
    pub ip: IpDescription,
    #[serde(deserialize_with = "substructure")]
    pub tcp: Option<TcpDescription>,
    #[serde(deserialize_with = "substructure")]
    pub udp: Option<UdpDescription>,
    #[serde(deserialize_with = "lenient_string")]
    pub payload: String,
}

impl PacketDescription {
    pub fn decode(rendered: &Value) -> Result<Self, DecodeError> {
        PacketDescription::deserialize(normalize(rendered.clone()))
            .map_err(|e| DecodeError::Invalid(e.to_string()))
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Normalize the keys of every map and drop null or empty entries, so that they fall
/// back to their defaults
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null() && v.as_str() != Some(""))
                .map(|(k, v)| (normalize_key(&k), normalize(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => Unexpected::Unsigned(u),
            (_, Some(i), _) => Unexpected::Signed(i),
            (_, _, Some(f)) => Unexpected::Float(f),
            _ => Unexpected::Other("number"),
        },
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

/// Booleans as they are commonly written in job files
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn lenient_uint<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value = Value::deserialize(deserializer)?;
    let n = match &value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::Bool(b) => Some(*b as u64),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    };
    match n {
        Some(n) => T::try_from(n)
            .map_err(|_| de::Error::invalid_value(Unexpected::Unsigned(n), &"an integer in range")),
        None => Err(de::Error::invalid_value(
            unexpected(&value),
            &"an unsigned integer",
        )),
    }
}

fn lenient_opt_uint<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    lenient_uint(deserializer).map(Some)
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => parse_bool(s),
        _ => None,
    };
    parsed.ok_or_else(|| de::Error::invalid_value(unexpected(&value), &"a boolean"))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
        other => Err(de::Error::invalid_type(unexpected(&other), &"a string")),
    }
}

fn lenient_ipv4<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Ipv4Addr>, D::Error> {
    let s = lenient_string(deserializer)?;
    s.trim()
        .parse()
        .map(Some)
        .map_err(|_| de::Error::invalid_value(Unexpected::Str(&s), &"an IPv4 address"))
}

/// A nested structure; `true` means "present with default values", `false` absent
fn substructure<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b.then(T::default)),
        Value::String(s) => match parse_bool(&s) {
            Some(b) => Ok(b.then(T::default)),
            None => Err(de::Error::invalid_value(
                Unexpected::Str(&s),
                &"a map or a boolean",
            )),
        },
        map @ Value::Object(_) => T::deserialize(map).map(Some).map_err(de::Error::custom),
        other => Err(de::Error::invalid_type(
            unexpected(&other),
            &"a map or a boolean",
        )),
    }
}

fn substructure_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    substructure(deserializer).map(Option::unwrap_or_default)
}

/// Flags are either letters ("SA") or a map of booleans. A boolean means no flag set.
fn tcp_flags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TcpFlags, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => TcpFlags::from_letters(&s).ok_or_else(|| {
            de::Error::invalid_value(Unexpected::Str(&s), &"TCP flag letters (SAFRPUEC)")
        }),
        Value::Bool(_) => Ok(TcpFlags::default()),
        map @ Value::Object(_) => TcpFlags::deserialize(map).map_err(de::Error::custom),
        other => Err(de::Error::invalid_type(
            unexpected(&other),
            &"flag letters or a map",
        )),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_udp_flag_and_payload() {
        let p = PacketDescription::decode(&json!({ "udp": true, "payload": "ping" })).unwrap();
        assert_eq!(p.udp, Some(UdpDescription::default()));
        assert_eq!(p.tcp, None);
        assert_eq!(p.payload, "ping");
        assert_eq!(p.ip, IpDescription::default());
    }

    #[test]
    fn test_lenient_numbers() {
        let p = PacketDescription::decode(&json!({
            "IP": { "SrcIP": "10.0.0.2", "ttl": "32", "id": "0x10" },
            "tcp": { "dst-port": "443", "seq": 12.0, "window": true, "flags": { "syn": "1", "ack": 0 } },
        }))
        .unwrap();
        assert_eq!(p.ip.src_ip, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(p.ip.ttl, 32);
        assert_eq!(p.ip.id, 16);
        let tcp = p.tcp.unwrap();
        assert_eq!(tcp.dst_port, Some(443));
        assert_eq!(tcp.seq, 12);
        assert_eq!(tcp.window, 1);
        assert!(tcp.flags.syn);
        assert!(!tcp.flags.ack);
    }

    #[test]
    fn test_flag_letters() {
        let p = PacketDescription::decode(&json!({ "tcp": { "flags": "SA" } })).unwrap();
        let flags = p.tcp.unwrap().flags;
        assert!(flags.syn && flags.ack && !flags.fin);
        assert_eq!(
            flags.bits(),
            pnet_packet::tcp::TcpFlags::SYN | pnet_packet::tcp::TcpFlags::ACK
        );
        assert!(PacketDescription::decode(&json!({ "tcp": { "flags": "SX" } })).is_err());
    }

    #[test]
    fn test_single_letter_flags() {
        for letters in ["F", "f"] {
            let p = PacketDescription::decode(&json!({ "tcp": { "flags": letters } })).unwrap();
            let flags = p.tcp.unwrap().flags;
            assert!(flags.fin);
            assert_eq!(flags.bits(), pnet_packet::tcp::TcpFlags::FIN);
        }
        // letters, never booleans
        assert!(PacketDescription::decode(&json!({ "tcp": { "flags": "T" } })).is_err());
        assert!(PacketDescription::decode(&json!({ "tcp": { "flags": "1" } })).is_err());
        let p = PacketDescription::decode(&json!({ "tcp": { "flags": true } })).unwrap();
        assert_eq!(p.tcp.unwrap().flags, TcpFlags::default());
    }

    #[test]
    fn test_absent_substructures() {
        let p = PacketDescription::decode(&json!({ "udp": false, "tcp": "", "ip": null })).unwrap();
        assert_eq!(p, PacketDescription::default());
    }

    #[test]
    fn test_payload_coercion() {
        let p = PacketDescription::decode(&json!({ "payload": 1234 })).unwrap();
        assert_eq!(p.payload, "1234");
    }

    #[test]
    fn test_errors() {
        let message = |v: Value| match PacketDescription::decode(&v) {
            Err(DecodeError::Invalid(m)) => m,
            Ok(p) => panic!("{v} decoded as {p:?}"),
        };
        assert!(message(json!({ "ip": { "ttl": "lots" } })).contains("lots"));
        assert!(message(json!({ "udp": { "dst_port": 70000 } })).contains("70000"));
        assert!(message(json!({ "udp": { "dst_port": -1 } })).contains("-1"));
        assert!(message(json!({ "ip": { "dst_ip": "10.0.0" } })).contains("IPv4"));
        assert!(message(json!({ "udp": [1, 2] })).contains("map"));
        assert!(PacketDescription::decode(&json!("udp")).is_err());
    }
}
