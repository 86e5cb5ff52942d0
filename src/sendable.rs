//! # Typed sendables
//!
//! A sendable is the unit of data transported through the bus: a JSON
//! envelope carrying a `did` type tag, a payload, an optional time-to-live
//! and rendering hints for dashboards. The broker never parses these; both
//! ends of the client do, through a registry of type-tag constructors.
use crate::error::Error;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Built-in type tags.
///
/// These exact strings are the interop contract with existing dashboard and
/// console applications; do not change them.
pub mod dtype {
    /// Integer payload
    pub const INT: &str = "kevinbotlib.dtype.int";
    /// Boolean payload
    pub const BOOL: &str = "kevinbotlib.dtype.bool";
    /// String payload
    pub const STR: &str = "kevinbotlib.dtype.str";
    /// Float payload
    pub const FLOAT: &str = "kevinbotlib.dtype.float";
    /// List payload of arbitrary JSON values
    pub const LIST_ANY: &str = "kevinbotlib.dtype.list.any";
    /// Dictionary payload
    pub const DICT: &str = "kevinbotlib.dtype.dict";
    /// Binary payload, base64-encoded on the wire
    pub const BIN: &str = "kevinbotlib.dtype.bin";
}

/// One dashboard rendering suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardElement {
    /// Field of the sendable to render
    pub element: String,
    /// Display format: `raw`, `percent`, `degrees`, `radians` or `limit:<n>`
    pub format: String,
}

/// Structure _suggestion_ for dashboard applications; ignored by the broker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructHint {
    /// Suggested dashboard elements
    #[serde(default)]
    pub dashboard: Vec<DashboardElement>,
}

impl StructHint {
    /// The common hint: render the `value` field as-is.
    pub fn raw_value() -> Self {
        Self {
            dashboard: vec![DashboardElement {
                element: "value".to_owned(),
                format: "raw".to_owned(),
            }],
        }
    }

    fn limited(limit: usize) -> Self {
        Self {
            dashboard: vec![DashboardElement {
                element: "value".to_owned(),
                format: format!("limit:{}", limit),
            }],
        }
    }
}

/// Wire envelope of a sendable. Every field is always serialized; the JSON
/// is compact, so values never contain a raw newline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Type tag
    pub did: String,
    /// Payload
    pub value: Value,
    /// Time-to-live in seconds, or null
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Rendering hint
    #[serde(rename = "struct", default)]
    pub hint: StructHint,
    /// Free-form marker strings
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Decoded payload of a sendable.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Integer
    Int(i64),
    /// Boolean
    Bool(bool),
    /// String
    Str(String),
    /// Float
    Float(f64),
    /// List of arbitrary JSON values
    List(Vec<Value>),
    /// Dictionary
    Dict(Map<String, Value>),
    /// Binary data, base64-encoded on the wire
    Bin(Vec<u8>),
    /// Payload of a user-registered type, kept as raw JSON
    Other(Value),
}

impl Payload {
    /// JSON representation used in the wire envelope.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Int(value) => json!(value),
            Payload::Bool(value) => json!(value),
            Payload::Str(value) => json!(value),
            Payload::Float(value) => json!(value),
            Payload::List(values) => Value::Array(values.clone()),
            Payload::Dict(map) => Value::Object(map.clone()),
            Payload::Bin(bytes) => Value::String(BASE64.encode(bytes)),
            Payload::Other(value) => value.clone(),
        }
    }
}

/// A typed record transported as the value string of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct Sendable {
    /// Type tag naming the constructor used to decode this record
    pub did: String,
    /// Decoded payload
    pub payload: Payload,
    /// Time-to-live in seconds; `set` turns it into a `SETX`
    pub timeout: Option<f64>,
    /// Rendering hint for dashboards
    pub hint: StructHint,
    /// Free-form marker strings
    pub flags: Vec<String>,
}

impl Sendable {
    fn with_payload(did: &str, payload: Payload, hint: StructHint) -> Self {
        Self {
            did: did.to_owned(),
            payload,
            timeout: None,
            hint,
            flags: vec![],
        }
    }

    /// Integer record.
    pub fn int(value: i64) -> Self {
        Self::with_payload(dtype::INT, Payload::Int(value), StructHint::raw_value())
    }

    /// Boolean record.
    pub fn boolean(value: bool) -> Self {
        Self::with_payload(dtype::BOOL, Payload::Bool(value), StructHint::raw_value())
    }

    /// String record.
    pub fn string(value: impl Into<String>) -> Self {
        Self::with_payload(dtype::STR, Payload::Str(value.into()), StructHint::raw_value())
    }

    /// Float record.
    pub fn float(value: f64) -> Self {
        Self::with_payload(dtype::FLOAT, Payload::Float(value), StructHint::raw_value())
    }

    /// List record.
    pub fn list(values: Vec<Value>) -> Self {
        Self::with_payload(dtype::LIST_ANY, Payload::List(values), StructHint::raw_value())
    }

    /// Dictionary record.
    pub fn dict(map: Map<String, Value>) -> Self {
        Self::with_payload(dtype::DICT, Payload::Dict(map), StructHint::raw_value())
    }

    /// Binary record; the payload travels base64-encoded.
    pub fn binary(bytes: Vec<u8>) -> Self {
        Self::with_payload(dtype::BIN, Payload::Bin(bytes), StructHint::limited(1024))
    }

    /// Attaches a time-to-live in seconds.
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Integer payload, if this record carries one.
    pub fn as_int(&self) -> Option<i64> {
        match self.payload {
            Payload::Int(value) => Some(value),
            _ => None,
        }
    }

    /// Boolean payload, if this record carries one.
    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            Payload::Bool(value) => Some(value),
            _ => None,
        }
    }

    /// String payload, if this record carries one.
    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Float payload, if this record carries one.
    pub fn as_float(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(value) => Some(value),
            _ => None,
        }
    }

    /// List payload, if this record carries one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match &self.payload {
            Payload::List(values) => Some(values),
            _ => None,
        }
    }

    /// Dictionary payload, if this record carries one.
    pub fn as_dict(&self) -> Option<&Map<String, Value>> {
        match &self.payload {
            Payload::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Binary payload, if this record carries one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bin(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Wire envelope for this record.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            did: self.did.clone(),
            value: self.payload.to_value(),
            timeout: self.timeout,
            hint: self.hint.clone(),
            flags: self.flags.clone(),
        }
    }

    /// Compact JSON for the wire. Never contains a newline.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.to_envelope())?)
    }
}

/// Constructor turning a wire envelope into a typed record.
pub type Constructor = fn(&Envelope) -> Result<Sendable, Error>;

/// Registry mapping `did` tags to constructors. Built-in types are
/// pre-registered; applications extend the map at runtime.
#[derive(Debug, Clone)]
pub struct SendableRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for SendableRegistry {
    fn default() -> Self {
        let mut registry = Self { constructors: HashMap::new() };
        registry.register(dtype::INT, decode_int);
        registry.register(dtype::BOOL, decode_bool);
        registry.register(dtype::STR, decode_str);
        registry.register(dtype::FLOAT, decode_float);
        registry.register(dtype::LIST_ANY, decode_list);
        registry.register(dtype::DICT, decode_dict);
        registry.register(dtype::BIN, decode_bin);
        registry
    }
}

impl SendableRegistry {
    /// Creates a registry holding the built-in types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the constructor for a type tag.
    pub fn register(&mut self, did: impl Into<String>, constructor: Constructor) {
        let did = did.into();
        trace!("registered data type {}", did);
        self.constructors.insert(did, constructor);
    }

    /// Decodes an envelope with the constructor registered for its tag.
    /// Unknown tags and malformed payloads yield `None`.
    pub fn decode(&self, envelope: &Envelope) -> Option<Sendable> {
        let constructor = self.constructors.get(&envelope.did)?;
        match constructor(envelope) {
            Ok(sendable) => Some(sendable),
            Err(e) => {
                warn!("cannot decode {} payload: {}", envelope.did, e);
                None
            }
        }
    }
}

fn from_envelope(envelope: &Envelope, payload: Payload) -> Sendable {
    Sendable {
        did: envelope.did.clone(),
        payload,
        timeout: envelope.timeout,
        hint: envelope.hint.clone(),
        flags: envelope.flags.clone(),
    }
}

fn payload_error(envelope: &Envelope, expected: &str) -> Error {
    Error::Protocol(format!("`{}` payload is not {}", envelope.did, expected))
}

fn decode_int(envelope: &Envelope) -> Result<Sendable, Error> {
    let value = envelope.value.as_i64().ok_or_else(|| payload_error(envelope, "an integer"))?;
    Ok(from_envelope(envelope, Payload::Int(value)))
}

fn decode_bool(envelope: &Envelope) -> Result<Sendable, Error> {
    let value = envelope.value.as_bool().ok_or_else(|| payload_error(envelope, "a boolean"))?;
    Ok(from_envelope(envelope, Payload::Bool(value)))
}

fn decode_str(envelope: &Envelope) -> Result<Sendable, Error> {
    let value = envelope.value.as_str().ok_or_else(|| payload_error(envelope, "a string"))?;
    Ok(from_envelope(envelope, Payload::Str(value.to_owned())))
}

fn decode_float(envelope: &Envelope) -> Result<Sendable, Error> {
    let value = envelope.value.as_f64().ok_or_else(|| payload_error(envelope, "a number"))?;
    Ok(from_envelope(envelope, Payload::Float(value)))
}

fn decode_list(envelope: &Envelope) -> Result<Sendable, Error> {
    let values = envelope.value.as_array().ok_or_else(|| payload_error(envelope, "a list"))?;
    Ok(from_envelope(envelope, Payload::List(values.clone())))
}

fn decode_dict(envelope: &Envelope) -> Result<Sendable, Error> {
    let map = envelope.value.as_object().ok_or_else(|| payload_error(envelope, "an object"))?;
    Ok(from_envelope(envelope, Payload::Dict(map.clone())))
}

fn decode_bin(envelope: &Envelope) -> Result<Sendable, Error> {
    let encoded = envelope.value.as_str().ok_or_else(|| payload_error(envelope, "a base64 string"))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| payload_error(envelope, "valid base64"))?;
    Ok(from_envelope(envelope, Payload::Bin(bytes)))
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(sendable: &Sendable) -> Sendable {
        let json = sendable.to_json().expect("encode");
        assert!(!json.contains('\n'), "wire JSON must be newline-free");
        let envelope: Envelope = serde_json::from_str(&json).expect("envelope");
        SendableRegistry::new().decode(&envelope).expect("decode")
    }

    #[test]
    fn builtin_round_trips() {
        assert_eq!(Some(42), round_trip(&Sendable::int(42)).as_int());
        assert_eq!(Some(true), round_trip(&Sendable::boolean(true)).as_bool());
        assert_eq!(Some("hi"), round_trip(&Sendable::string("hi")).as_str());
        assert_eq!(Some(1.5), round_trip(&Sendable::float(1.5)).as_float());
        assert_eq!(
            2,
            round_trip(&Sendable::list(vec![json!(1), json!("two")])).as_list().expect("list").len()
        );

        let mut map = Map::new();
        map.insert("speed".to_owned(), json!(0.5));
        assert_eq!(Some(&map), round_trip(&Sendable::dict(map.clone())).as_dict());
    }

    #[test]
    fn binary_travels_base64() {
        let sendable = Sendable::binary(vec![0, 1, 2, 255]);
        let envelope = sendable.to_envelope();
        assert_eq!(Some("AAEC/w=="), envelope.value.as_str());
        assert_eq!(Some(&[0u8, 1, 2, 255][..]), round_trip(&sendable).as_bytes());
    }

    #[test]
    fn timeout_survives_the_wire() {
        let sendable = Sendable::int(1).with_timeout(2.5);
        assert_eq!(Some(2.5), round_trip(&sendable).timeout);

        // absent TTL serializes as an explicit null
        let json = Sendable::int(1).to_json().expect("encode");
        assert!(json.contains("\"timeout\":null"));
    }

    #[test]
    fn default_hints() {
        let envelope = Sendable::int(1).to_envelope();
        assert_eq!("value", envelope.hint.dashboard[0].element);
        assert_eq!("raw", envelope.hint.dashboard[0].format);

        let envelope = Sendable::binary(vec![1]).to_envelope();
        assert_eq!("limit:1024", envelope.hint.dashboard[0].format);
    }

    #[test]
    fn unknown_did_is_absent() {
        let envelope = Envelope {
            did: "example.vendor.frame".to_owned(),
            value: json!(1),
            timeout: None,
            hint: StructHint::default(),
            flags: vec![],
        };
        assert_eq!(None, SendableRegistry::new().decode(&envelope));
    }

    #[test]
    fn malformed_payload_is_absent() {
        let envelope = Envelope {
            did: dtype::INT.to_owned(),
            value: json!("not a number"),
            timeout: None,
            hint: StructHint::default(),
            flags: vec![],
        };
        assert_eq!(None, SendableRegistry::new().decode(&envelope));
    }

    #[test]
    fn registered_types_extend_the_map() {
        fn decode_frame(envelope: &Envelope) -> Result<Sendable, Error> {
            Ok(Sendable {
                did: envelope.did.clone(),
                payload: Payload::Other(envelope.value.clone()),
                timeout: envelope.timeout,
                hint: envelope.hint.clone(),
                flags: envelope.flags.clone(),
            })
        }

        let mut registry = SendableRegistry::new();
        registry.register("example.vendor.frame", decode_frame);

        let envelope = Envelope {
            did: "example.vendor.frame".to_owned(),
            value: json!({"w": 640}),
            timeout: None,
            hint: StructHint::default(),
            flags: vec![],
        };
        let sendable = registry.decode(&envelope).expect("decode");
        assert_eq!(Payload::Other(json!({"w": 640})), sendable.payload);
    }

    #[test]
    fn envelope_tolerates_missing_optional_fields() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"did":"kevinbotlib.dtype.int","value":7}"#).expect("envelope");
        assert_eq!(None, envelope.timeout);
        assert!(envelope.flags.is_empty());
        assert_eq!(Some(7), SendableRegistry::new().decode(&envelope).expect("decode").as_int());
    }
}
