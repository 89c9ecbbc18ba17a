//! Ledger Payload
//!
//! The ledger never interprets business data, but it must be able to hash it
//! deterministically. Any `Serialize` value is lowered into a `Payload` tree
//! here; anything that has no single canonical form (NaN, infinite floats,
//! non-string map keys, duplicate keys) is rejected before hashing.

use serde::de::DeserializeOwned;
use serde::{ser, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Largest integer an f64 represents exactly (2^53).
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Normalized, canonicalizable business data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// A missing optional value. Distinct from `Null`.
    Absent,
    Null,
    Bool(bool),
    Int(i64),
    /// Only for values above `i64::MAX`.
    UInt(u64),
    /// Always finite and never integral within ±2^53.
    Float(f64),
    Text(String),
    List(Vec<Payload>),
    Map(BTreeMap<String, Payload>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadError(String);

impl PayloadError {
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload is not canonicalizable: {}", self.0)
    }
}

impl std::error::Error for PayloadError {}

impl ser::Error for PayloadError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        PayloadError(msg.to_string())
    }
}

impl Payload {
    /// Lower any serializable value into a canonicalizable payload.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, PayloadError> {
        value.serialize(PayloadSerializer)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, PayloadError> {
        Self::from_serialize(value)
    }

    fn from_u64(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => Payload::Int(i),
            Err(_) => Payload::UInt(v),
        }
    }

    fn from_f64(v: f64) -> Result<Self, PayloadError> {
        if !v.is_finite() {
            return Err(PayloadError(format!("non-finite number {}", v)));
        }
        if v.trunc() == v && v.abs() < MAX_EXACT_FLOAT_INT {
            // Also folds -0.0 into 0
            return Ok(Payload::Int(v as i64));
        }
        Ok(Payload::Float(v))
    }

    /// Render as plain JSON for display. `Absent` map entries are dropped and
    /// `Absent` elsewhere renders as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Payload::Absent | Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Int(i) => Value::from(*i),
            Payload::UInt(u) => Value::from(*u),
            Payload::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Payload::Text(s) => Value::String(s.clone()),
            Payload::List(items) => Value::Array(items.iter().map(Payload::to_json).collect()),
            Payload::Map(entries) => Value::Object(
                entries
                    .iter()
                    .filter(|(_, v)| !matches!(v, Payload::Absent))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Decode back into a typed value through its JSON rendering.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }

    /// Field lookup on a map payload.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Map(entries) => entries.get(key),
            _ => None,
        }
    }
}

struct PayloadSerializer;

fn map_key(key: Payload) -> Result<String, PayloadError> {
    match key {
        Payload::Text(s) => Ok(s),
        Payload::Int(i) => Ok(i.to_string()),
        Payload::UInt(u) => Ok(u.to_string()),
        other => Err(PayloadError(format!(
            "map keys must be strings or integers, got {:?}",
            other
        ))),
    }
}

fn insert_unique(
    entries: &mut BTreeMap<String, Payload>,
    key: String,
    value: Payload,
) -> Result<(), PayloadError> {
    if entries.contains_key(&key) {
        return Err(PayloadError(format!("duplicate map key '{}'", key)));
    }
    entries.insert(key, value);
    Ok(())
}

fn tagged(variant: &str, value: Payload) -> Payload {
    let mut entries = BTreeMap::new();
    entries.insert(variant.to_string(), value);
    Payload::Map(entries)
}

impl ser::Serializer for PayloadSerializer {
    type Ok = Payload;
    type Error = PayloadError;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = SeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = MapBuilder;

    fn serialize_bool(self, v: bool) -> Result<Payload, PayloadError> {
        Ok(Payload::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Payload, PayloadError> {
        Ok(Payload::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Payload, PayloadError> {
        Ok(Payload::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Payload, PayloadError> {
        Ok(Payload::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Payload, PayloadError> {
        Ok(Payload::Int(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Payload, PayloadError> {
        if let Ok(i) = i64::try_from(v) {
            return Ok(Payload::Int(i));
        }
        u64::try_from(v)
            .map(Payload::UInt)
            .map_err(|_| PayloadError(format!("integer {} out of 64-bit range", v)))
    }

    fn serialize_u8(self, v: u8) -> Result<Payload, PayloadError> {
        Ok(Payload::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Payload, PayloadError> {
        Ok(Payload::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Payload, PayloadError> {
        Ok(Payload::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Payload, PayloadError> {
        Ok(Payload::from_u64(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Payload, PayloadError> {
        u64::try_from(v)
            .map(Payload::from_u64)
            .map_err(|_| PayloadError(format!("integer {} out of 64-bit range", v)))
    }

    fn serialize_f32(self, v: f32) -> Result<Payload, PayloadError> {
        Payload::from_f64(v.into())
    }

    fn serialize_f64(self, v: f64) -> Result<Payload, PayloadError> {
        Payload::from_f64(v)
    }

    fn serialize_char(self, v: char) -> Result<Payload, PayloadError> {
        Ok(Payload::Text(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Payload, PayloadError> {
        Ok(Payload::Text(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Payload, PayloadError> {
        Ok(Payload::List(v.iter().map(|b| Payload::Int((*b).into())).collect()))
    }

    fn serialize_none(self) -> Result<Payload, PayloadError> {
        Ok(Payload::Absent)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Payload, PayloadError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Payload, PayloadError> {
        Ok(Payload::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Payload, PayloadError> {
        Ok(Payload::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Payload, PayloadError> {
        Ok(Payload::Text(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Payload, PayloadError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Payload, PayloadError> {
        Ok(tagged(variant, value.serialize(PayloadSerializer)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder, PayloadError> {
        Ok(SeqBuilder::new(len, None))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder, PayloadError> {
        Ok(SeqBuilder::new(Some(len), None))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, PayloadError> {
        Ok(SeqBuilder::new(Some(len), None))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, PayloadError> {
        Ok(SeqBuilder::new(Some(len), Some(variant)))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapBuilder, PayloadError> {
        Ok(MapBuilder::new(None))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<MapBuilder, PayloadError> {
        Ok(MapBuilder::new(None))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<MapBuilder, PayloadError> {
        Ok(MapBuilder::new(Some(variant)))
    }
}

struct SeqBuilder {
    items: Vec<Payload>,
    variant: Option<&'static str>,
}

impl SeqBuilder {
    fn new(len: Option<usize>, variant: Option<&'static str>) -> Self {
        Self {
            items: Vec::with_capacity(len.unwrap_or(0)),
            variant,
        }
    }

    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), PayloadError> {
        self.items.push(value.serialize(PayloadSerializer)?);
        Ok(())
    }

    fn finish(self) -> Payload {
        let list = Payload::List(self.items);
        match self.variant {
            Some(variant) => tagged(variant, list),
            None => list,
        }
    }
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Payload;
    type Error = PayloadError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), PayloadError> {
        self.push(value)
    }

    fn end(self) -> Result<Payload, PayloadError> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Payload;
    type Error = PayloadError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), PayloadError> {
        self.push(value)
    }

    fn end(self) -> Result<Payload, PayloadError> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Payload;
    type Error = PayloadError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), PayloadError> {
        self.push(value)
    }

    fn end(self) -> Result<Payload, PayloadError> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleVariant for SeqBuilder {
    type Ok = Payload;
    type Error = PayloadError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), PayloadError> {
        self.push(value)
    }

    fn end(self) -> Result<Payload, PayloadError> {
        Ok(self.finish())
    }
}

struct MapBuilder {
    entries: BTreeMap<String, Payload>,
    pending_key: Option<String>,
    variant: Option<&'static str>,
}

impl MapBuilder {
    fn new(variant: Option<&'static str>) -> Self {
        Self {
            entries: BTreeMap::new(),
            pending_key: None,
            variant,
        }
    }

    fn finish(self) -> Payload {
        let map = Payload::Map(self.entries);
        match self.variant {
            Some(variant) => tagged(variant, map),
            None => map,
        }
    }
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Payload;
    type Error = PayloadError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), PayloadError> {
        self.pending_key = Some(map_key(key.serialize(PayloadSerializer)?)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), PayloadError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| PayloadError("map value serialized before its key".to_string()))?;
        let value = value.serialize(PayloadSerializer)?;
        insert_unique(&mut self.entries, key, value)
    }

    fn end(self) -> Result<Payload, PayloadError> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for MapBuilder {
    type Ok = Payload;
    type Error = PayloadError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), PayloadError> {
        let value = value.serialize(PayloadSerializer)?;
        insert_unique(&mut self.entries, key.to_string(), value)
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), PayloadError> {
        // Skipped fields stay visible to the hash as absent
        insert_unique(&mut self.entries, key.to_string(), Payload::Absent)
    }

    fn end(self) -> Result<Payload, PayloadError> {
        Ok(self.finish())
    }
}

impl ser::SerializeStructVariant for MapBuilder {
    type Ok = Payload;
    type Error = PayloadError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), PayloadError> {
        let value = value.serialize(PayloadSerializer)?;
        insert_unique(&mut self.entries, key.to_string(), value)
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), PayloadError> {
        insert_unique(&mut self.entries, key.to_string(), Payload::Absent)
    }

    fn end(self) -> Result<Payload, PayloadError> {
        Ok(self.finish())
    }
}
