//! Wire envelope: correlation id, type tag and flattened payload fields.
//!
//! ```text
//! {"id": "<uuid>", "type": "LoadPlanningDataRequest", "skeleton_dir_path": "/a", ...}
//! ```

use serde_json::{Map, Value};

use crate::types::{CorrelationId, ProtocolError};

/// JSON key of the correlation id.
pub const ID_FIELD: &str = "id";
/// JSON key of the type tag.
pub const TYPE_FIELD: &str = "type";

/// One framed message, payload still in JSON form.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: CorrelationId,
    pub type_tag: String,
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn new(id: CorrelationId, type_tag: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
            fields,
        }
    }

    /// Flatten into a single JSON object. Envelope keys win over payload keys
    /// of the same name.
    pub fn to_json(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(ID_FIELD.to_string(), Value::String(self.id.to_string()));
        object.insert(TYPE_FIELD.to_string(), Value::String(self.type_tag.clone()));
        Value::Object(object)
    }

    /// Split a frame body into envelope and payload fields.
    pub fn from_slice(body: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::MalformedFrame(format!("invalid JSON: {}", e)))?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::MalformedFrame(
                "frame body is not a JSON object".to_string(),
            ));
        };

        let type_tag = match fields.remove(TYPE_FIELD) {
            Some(Value::String(tag)) if !tag.is_empty() => tag,
            _ => return Err(ProtocolError::MissingField(TYPE_FIELD)),
        };
        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(id)) => CorrelationId::from_string(id)
                .map_err(|_| ProtocolError::MissingField(ID_FIELD))?,
            _ => return Err(ProtocolError::MissingField(ID_FIELD)),
        };

        Ok(Self {
            id,
            type_tag,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_flattened_round_trip() {
        let message = Message::new(
            CorrelationId::new(),
            "LoadPlanningDataResponse",
            fields(json!({"success": true, "error_message": ""})),
        );
        let body = serde_json::to_vec(&message.to_json()).unwrap();
        assert_eq!(Message::from_slice(&body).unwrap(), message);
    }

    #[test]
    fn test_missing_type_is_protocol_error() {
        let err = Message::from_slice(br#"{"id": "abc", "success": true}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingField("type"));
    }

    #[test]
    fn test_missing_or_empty_id_is_protocol_error() {
        let err = Message::from_slice(br#"{"type": "StopRegistrationRequest"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingField("id"));
        let err = Message::from_slice(br#"{"id": "", "type": "StopRegistrationRequest"}"#)
            .unwrap_err();
        assert_eq!(err, ProtocolError::MissingField("id"));
    }

    #[test]
    fn test_non_object_body_is_malformed() {
        assert!(matches!(
            Message::from_slice(b"[1, 2, 3]"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            Message::from_slice(b"not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_envelope_keys_override_payload_keys() {
        let id = CorrelationId::from_string("real".into()).unwrap();
        let message = Message::new(id, "Custom", fields(json!({"id": "spoofed"})));
        assert_eq!(message.to_json()["id"], "real");
    }
}
