//! Opaque request and reply bodies.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An uninterpreted unit of work or result.
///
/// The protocol never branches on the shape of a payload. It only moves it
/// between the wire and the pending and result tables.
///
/// Any value either codec can carry is accepted. A binary value at the top
/// level is kept as [`Payload::Binary`] and written back as MessagePack
/// `bin`. Binary values nested in arrays or maps, and map keys that are not
/// strings, are folded into their JSON form: byte arrays become arrays of
/// numbers and keys are stringified.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// A value with a JSON representation.
    Value(Value),
    /// Raw bytes.
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Payload {
    /// Returns the JSON value, unless the payload is binary.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Value(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }

    /// Returns the payload as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    fn into_json(self) -> Value {
        match self {
            Payload::Value(value) => value,
            Payload::Binary(bytes) => bytes.into_iter().map(Value::from).collect(),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Value(Value::Null)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Value(Value::String(s)) => f.write_str(s),
            Payload::Value(other) => write!(f, "{other}"),
            Payload::Binary(bytes) => write!(f, "b\"{}\"", bytes.escape_ascii()),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Value(Value::String(s.to_owned()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Value(Value::String(s))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PayloadVisitor)
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Payload, E> {
        Ok(Value::Bool(v).into())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Payload, E> {
        Ok(Value::from(v).into())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Payload, E> {
        Ok(Value::from(v).into())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Payload, E> {
        Ok(Value::from(v).into())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Payload, E> {
        Ok(v.into())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Payload, E> {
        Ok(v.into())
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Payload, E> {
        Ok(Payload::Binary(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Payload, E> {
        Ok(Payload::Binary(v))
    }

    fn visit_none<E: de::Error>(self) -> Result<Payload, E> {
        Ok(Payload::default())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Payload, E> {
        Ok(Payload::default())
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Payload, D::Error>
    where
        D: Deserializer<'de>,
    {
        Payload::deserialize(deserializer)
    }

    // MessagePack extension values arrive as newtype structs.
    fn visit_newtype_struct<D>(self, deserializer: D) -> Result<Payload, D::Error>
    where
        D: Deserializer<'de>,
    {
        Payload::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Payload, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Payload>()? {
            items.push(item.into_json());
        }
        Ok(Value::Array(items).into())
    }

    fn visit_map<A>(self, mut map: A) -> Result<Payload, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut object = serde_json::Map::new();
        while let Some((key, value)) = map.next_entry::<Payload, Payload>()? {
            let key = match key {
                Payload::Value(Value::String(key)) => key,
                other => other.to_string(),
            };
            object.insert(key, value.into_json());
        }
        Ok(Value::Object(object).into())
    }
}
