//! Bridge wire envelopes
//!
//! Every frame on the channel holds exactly one envelope, JSON-encoded with a
//! `direction` tag:
//!
//! ```json
//! {"direction":"call","id":7,"name":"DisplayMessage","args":["Listening..."]}
//! {"direction":"return","id":7,"result":null}
//! {"direction":"error","id":7,"error":{"kind":"FunctionNotExposed","message":"..."}}
//! ```

use crate::error::{BridgeError, BridgeResult, ErrorInfo};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id linking a call to its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl From<u64> for CorrelationId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Envelope direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Call,
    Return,
    Error,
}

/// A single message on the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase", deny_unknown_fields)]
pub enum Envelope {
    /// Invoke `name` on the receiving side
    Call {
        id: CorrelationId,
        name: String,
        args: Vec<Value>,
    },
    /// Successful completion of the call with the same id
    Return { id: CorrelationId, result: Value },
    /// Failed completion of the call with the same id
    Error { id: CorrelationId, error: ErrorInfo },
}

impl Envelope {
    /// Create a call envelope
    pub fn call(id: impl Into<CorrelationId>, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Call {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// Create a return envelope
    pub fn ret(id: impl Into<CorrelationId>, result: Value) -> Self {
        Self::Return {
            id: id.into(),
            result,
        }
    }

    /// Create an error envelope
    pub fn error(id: impl Into<CorrelationId>, error: ErrorInfo) -> Self {
        Self::Error {
            id: id.into(),
            error,
        }
    }

    /// Correlation id of this envelope
    pub fn id(&self) -> CorrelationId {
        match self {
            Self::Call { id, .. } | Self::Return { id, .. } | Self::Error { id, .. } => *id,
        }
    }

    /// Direction tag of this envelope
    pub fn direction(&self) -> Direction {
        match self {
            Self::Call { .. } => Direction::Call,
            Self::Return { .. } => Direction::Return,
            Self::Error { .. } => Direction::Error,
        }
    }

    /// Encode into a frame payload
    pub fn encode(&self) -> BridgeResult<Vec<u8>> {
        // Values are already inside the serializable set, so this only fails on a serde_json bug.
        serde_json::to_vec(self).map_err(|e| BridgeError::malformed(e.to_string()))
    }

    /// Decode a frame payload
    pub fn decode(bytes: &[u8]) -> BridgeResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::malformed(e.to_string()))
    }
}

/// Convert typed call arguments into wire values.
///
/// Fails with `UnserializableArgument` naming the first offending position.
/// NaN and infinities have no JSON form and are rejected rather than sent as
/// `null`.
pub fn to_args<I, T>(args: I) -> BridgeResult<Vec<Value>>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    args.into_iter()
        .enumerate()
        .map(|(index, arg)| {
            to_wire_value(&arg).map_err(|message| BridgeError::unserializable(index, message))
        })
        .collect()
}

/// Convert a callable's typed result into a wire value
pub fn to_result<T: Serialize>(result: T) -> Result<Value, ErrorInfo> {
    to_wire_value(&result)
        .map_err(|message| ErrorInfo::failure(format!("result is not serializable: {}", message)))
}

fn to_wire_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, String> {
    let converted = serde_json::to_value(value).map_err(|e| e.to_string())?;
    value.serialize(FiniteCheck).map_err(|e| e.0)?;
    Ok(converted)
}

#[derive(Debug)]
struct NonFinite(String);

impl std::fmt::Display for NonFinite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NonFinite {}

impl ser::Error for NonFinite {
    fn custom<M: std::fmt::Display>(msg: M) -> Self {
        Self(msg.to_string())
    }
}

/// Walks a value and fails on the first float JSON cannot represent
struct FiniteCheck;

type Checked = Result<(), NonFinite>;

fn finite(v: f64) -> Checked {
    if v.is_finite() {
        Ok(())
    } else {
        Err(NonFinite(format!("{} has no JSON representation", v)))
    }
}

macro_rules! accept {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(fn $method(self, _: $ty) -> Checked { Ok(()) })*
    };
}

impl Serializer for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept! {
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8],
        serialize_unit_struct: &'static str,
    }

    fn serialize_f32(self, v: f32) -> Checked {
        finite(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Checked {
        finite(v)
    }

    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Checked {
        key.serialize(FiniteCheck)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_call_wire_shape() {
        let env = Envelope::call(7, "DisplayMessage", vec![json!("Listening...")]);
        let text = String::from_utf8(env.encode().unwrap()).unwrap();

        assert!(text.contains("\"direction\":\"call\""));
        assert!(text.contains("\"id\":7"));
        assert!(text.contains("\"name\":\"DisplayMessage\""));
        assert!(text.contains("\"args\":[\"Listening...\"]"));
    }

    #[test]
    fn test_round_trip_all_shapes() {
        let envelopes = vec![
            Envelope::call(1, "senderText", vec![json!("hi"), json!({"k": [1, 2.5, null]})]),
            Envelope::call(2, "ShowHood", vec![]),
            Envelope::ret(3, json!({"nested": {"list": [true, false]}})),
            Envelope::ret(4, Value::Null),
            Envelope::error(5, ErrorInfo::new("ValueError", "nope")),
            Envelope::call(u64::MAX, "max", vec![json!(-12), json!(1e300)]),
        ];

        for env in envelopes {
            let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
            assert_eq!(decoded, env);
        }
    }

    #[test]
    fn test_floats_round_trip_exactly() {
        let floats = [
            1.0715660391465826e-75,
            0.1,
            1.0 / 3.0,
            2.2250738585072011e-308,
            5e-324,
            f64::MIN_POSITIVE,
            f64::MAX,
            -9.8765432109876e123,
        ];

        for f in floats {
            let env = Envelope::call(1, "f", vec![json!(f)]);
            let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
            assert_eq!(decoded, env, "{:e} changed on the wire", f);
            match decoded {
                Envelope::Call { args, .. } => assert_eq!(args[0].as_f64(), Some(f)),
                other => panic!("unexpected envelope {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_rejects_mixed_shapes() {
        let cases = [
            r#"{"direction":"call","id":1,"name":"f","args":[],"result":1}"#,
            r#"{"direction":"return","id":1}"#,
            r#"{"direction":"return","id":1,"result":1,"name":"f"}"#,
            r#"{"direction":"error","id":1,"error":{"kind":"x"}}"#,
            r#"{"direction":"call","id":1,"args":[]}"#,
            r#"{"direction":"notify","id":1}"#,
            r#"{"id":1,"result":1}"#,
            r#"{"direction":"call","id":-1,"name":"f","args":[]}"#,
            r#"not json"#,
        ];

        for case in cases {
            let err = Envelope::decode(case.as_bytes()).unwrap_err();
            assert!(
                matches!(err, BridgeError::MalformedEnvelope { .. }),
                "expected malformed for {}",
                case
            );
        }
    }

    #[test]
    fn test_accessors() {
        let env = Envelope::error(9, ErrorInfo::failure("boom"));
        assert_eq!(env.id(), CorrelationId(9));
        assert_eq!(env.direction(), Direction::Error);
        assert_eq!(CorrelationId(9).to_string(), "#9");
    }

    #[test]
    fn test_to_args_converts_in_order() {
        let args = to_args(["a", "b"]).unwrap();
        assert_eq!(args, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_to_args_rejects_non_string_keys() {
        let mut map = BTreeMap::new();
        map.insert((1, 2), "point");

        let err = to_args([map]).unwrap_err();
        assert!(matches!(err, BridgeError::UnserializableArgument { index: 0, .. }));
    }

    #[test]
    fn test_to_args_rejects_non_finite_floats() {
        let err = to_args([1.5, f64::NAN]).unwrap_err();
        assert!(matches!(err, BridgeError::UnserializableArgument { index: 1, .. }));

        let err = to_args([f64::INFINITY]).unwrap_err();
        assert!(matches!(err, BridgeError::UnserializableArgument { index: 0, .. }));

        // Nested inside containers and options too
        let nested: Vec<Option<Vec<f32>>> = vec![None, Some(vec![1.0, f32::NEG_INFINITY])];
        let err = to_args([nested]).unwrap_err();
        assert!(matches!(err, BridgeError::UnserializableArgument { index: 0, .. }));

        let mut map = BTreeMap::new();
        map.insert("speed", f64::NAN);
        assert!(to_args([map]).is_err());
    }

    #[test]
    fn test_to_args_keeps_none_as_null() {
        let args = to_args([None, Some(2.5)]).unwrap();
        assert_eq!(args, vec![Value::Null, json!(2.5)]);
    }

    #[test]
    fn test_to_result() {
        assert_eq!(to_result(vec![1, 2]).unwrap(), json!([1, 2]));

        let err = to_result(f64::NEG_INFINITY).unwrap_err();
        assert_eq!(err.kind, crate::error::kinds::CALLABLE_FAILURE);
        assert!(err.message.starts_with("result is not serializable"));
    }
}
