//! Storage encoding for envelopes and status fields.
//!
//! The tracker backends treat every value as an opaque byte blob; this module
//! decides what those bytes look like. The default [`JsonCodec`] keeps numbers,
//! strings, lists and maps exactly as they were submitted.

use crate::error::TasklibResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;

/// Encoding used for queue entries and status record fields.
pub trait Codec: Send + Sync + Debug {
    /// Encode a structured value into bytes
    fn encode(&self, value: &Value) -> TasklibResult<Vec<u8>>;

    /// Decode bytes back into a structured value
    fn decode(&self, bytes: &[u8]) -> TasklibResult<Value>;
}

/// JSON encoding (the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> TasklibResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> TasklibResult<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Encode any serializable value with `codec`
pub fn encode_as<T: Serialize + ?Sized>(codec: &dyn Codec, value: &T) -> TasklibResult<Vec<u8>> {
    codec.encode(&serde_json::to_value(value)?)
}

/// Decode bytes produced by [`encode_as`] back into `T`
pub fn decode_as<T: DeserializeOwned>(codec: &dyn Codec, bytes: &[u8]) -> TasklibResult<T> {
    Ok(serde_json::from_value(codec.decode(bytes)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Envelope, Fault, Kwargs, TaskStatus};
    use crate::{args, kwargs};
    use serde_json::json;

    #[test]
    fn test_envelope_keeps_value_types() {
        let codec = JsonCodec;
        let envelope = Envelope::new(
            "resize",
            args![1, 1.5, "x", [1, 2], json!({ "nested": null })],
            kwargs! { "big" => u64::MAX, "neg" => -7 },
        );

        let bytes = encode_as(&codec, &envelope).unwrap();
        let decoded: Envelope = decode_as(&codec, &bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert!(decoded.args[0].is_i64());
        assert!(decoded.args[1].is_f64());
        assert_eq!(decoded.kwargs["big"], json!(u64::MAX));
    }

    #[test]
    fn test_status_and_fault_fields() {
        let codec = JsonCodec;
        let bytes = encode_as(&codec, &TaskStatus::Success).unwrap();
        assert_eq!(bytes, b"\"SUCCESS\"");

        let fault = Fault::new("ValueError", "bad input").with_trace("line 3");
        let bytes = encode_as(&codec, &fault).unwrap();
        assert_eq!(decode_as::<Fault>(&codec, &bytes).unwrap(), fault);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = JsonCodec;
        assert!(decode_as::<Envelope>(&codec, b"\x00\x01not json").is_err());
        assert!(decode_as::<Envelope>(&codec, b"{\"task_id\": 1}").is_err());
        let empty: Kwargs = decode_as(&codec, b"{}").unwrap();
        assert!(empty.is_empty());
    }
}
