//! Message registry — type tag → payload schema.
//!
//! Built once per service from the catalogue. Extra types can be registered at
//! runtime, either with a catalogue struct ([`PayloadSchema::of`]) or as opaque
//! JSON ([`PayloadSchema::opaque`]).

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::messages::{
    CatalogueMessage, CustomPayload, InitContinuousRegistrationRequest,
    InitContinuousRegistrationResponse, LoadPlanningDataRequest, Payload, Request,
    StartRegistrationRequest, StopRegistrationRequest, UpdateAntennaSampleRequest,
    LEGACY_INIT_REQUEST_TAG, LEGACY_INIT_RESPONSE_TAG,
};
use crate::types::{ProtocolError, Result};

/// Decodes payload fields for one type tag.
pub type DecodeFn = fn(&str, Map<String, Value>) -> serde_json::Result<Payload>;

fn decode_typed<T: CatalogueMessage>(
    _tag: &str,
    fields: Map<String, Value>,
) -> serde_json::Result<Payload> {
    serde_json::from_value::<T>(Value::Object(fields)).map(Into::into)
}

fn decode_opaque(tag: &str, fields: Map<String, Value>) -> serde_json::Result<Payload> {
    Ok(Payload::Custom(CustomPayload::new(tag, fields)))
}

/// How to decode one message kind, and what answers it.
#[derive(Debug, Clone)]
pub struct PayloadSchema {
    decode: DecodeFn,
    response_tag: Option<String>,
    error_shaped: bool,
}

impl PayloadSchema {
    /// Schema backed by a catalogue struct.
    pub fn of<T: CatalogueMessage>() -> Self {
        Self {
            decode: decode_typed::<T>,
            response_tag: None,
            error_shaped: T::ERROR_SHAPED,
        }
    }

    /// Schema that keeps the fields as raw JSON.
    pub fn opaque() -> Self {
        Self {
            decode: decode_opaque,
            response_tag: None,
            error_shaped: false,
        }
    }

    /// Name the type tag that answers this message.
    #[must_use]
    pub fn with_response(mut self, tag: impl Into<String>) -> Self {
        self.response_tag = Some(tag.into());
        self
    }

    /// Mark the schema as carrying `success` and `error_message`.
    #[must_use]
    pub fn error_shaped(mut self) -> Self {
        self.error_shaped = true;
        self
    }

    pub fn response_tag(&self) -> Option<&str> {
        self.response_tag.as_deref()
    }

    pub fn is_error_shaped(&self) -> bool {
        self.error_shaped
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    schemas: HashMap<String, PayloadSchema>,
    /// alternative spelling → canonical tag
    aliases: HashMap<String, String>,
}

impl RegistryState {
    fn canonical<'a>(&'a self, tag: &'a str) -> &'a str {
        self.aliases.get(tag).map(String::as_str).unwrap_or(tag)
    }
}

/// Type tag → schema table. Read-mostly; safe for concurrent lookup.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    state: RwLock<RegistryState>,
}

impl MessageRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the full message catalogue.
    pub fn with_catalogue() -> Self {
        let registry = Self::new();
        registry.register_request::<InitContinuousRegistrationRequest>();
        registry.register_request::<LoadPlanningDataRequest>();
        registry.register_request::<StartRegistrationRequest>();
        registry.register_request::<StopRegistrationRequest>();
        registry.register_request::<UpdateAntennaSampleRequest>();
        registry.alias(LEGACY_INIT_REQUEST_TAG, InitContinuousRegistrationRequest::TYPE_TAG);
        registry.alias(LEGACY_INIT_RESPONSE_TAG, InitContinuousRegistrationResponse::TYPE_TAG);
        registry
    }

    /// Register (or replace) the schema for a type tag.
    pub fn register(&self, type_tag: impl Into<String>, schema: PayloadSchema) {
        let type_tag = type_tag.into();
        tracing::debug!("Registered message type: {}", type_tag);
        self.state.write().schemas.insert(type_tag, schema);
    }

    /// Register a catalogue request together with its paired response.
    pub fn register_request<R: Request>(&self) {
        self.register(
            R::TYPE_TAG,
            PayloadSchema::of::<R>().with_response(R::Response::TYPE_TAG),
        );
        self.register(R::Response::TYPE_TAG, PayloadSchema::of::<R::Response>());
    }

    /// Accept `alias` on decode as another spelling of `canonical`.
    pub fn alias(&self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.state
            .write()
            .aliases
            .insert(alias.into(), canonical.into());
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        let state = self.state.read();
        state.schemas.contains_key(state.canonical(type_tag))
    }

    /// Whether the tag answers some registered request.
    pub fn is_response(&self, type_tag: &str) -> bool {
        let state = self.state.read();
        let canonical = state.canonical(type_tag);
        state
            .schemas
            .values()
            .any(|schema| schema.response_tag.as_deref() == Some(canonical))
    }

    /// Canonical spelling of a tag; unknown tags come back unchanged.
    pub fn canonical_tag(&self, type_tag: &str) -> String {
        self.state.read().canonical(type_tag).to_string()
    }

    /// Schema registered for a tag (aliases resolved).
    pub fn schema(&self, type_tag: &str) -> Option<PayloadSchema> {
        let state = self.state.read();
        state.schemas.get(state.canonical(type_tag)).cloned()
    }

    /// Decode payload fields received under `type_tag`.
    pub fn decode_payload(&self, type_tag: &str, fields: Map<String, Value>) -> Result<Payload> {
        let (canonical, schema) = {
            let state = self.state.read();
            let canonical = state.canonical(type_tag).to_string();
            let schema = state
                .schemas
                .get(&canonical)
                .cloned()
                .ok_or_else(|| ProtocolError::UnknownType(type_tag.to_string()))?;
            (canonical, schema)
        };

        (schema.decode)(&canonical, fields).map_err(|e| {
            ProtocolError::MalformedFrame(format!("invalid {} payload: {}", canonical, e)).into()
        })
    }

    /// Encode a payload into its wire tag and fields.
    pub fn encode_payload(&self, payload: &Payload) -> Result<(String, Map<String, Value>)> {
        let type_tag = payload.type_tag();
        if !self.contains(type_tag) {
            return Err(ProtocolError::UnknownType(type_tag.to_string()).into());
        }
        Ok((type_tag.to_string(), payload.to_fields()?))
    }

    /// Error-shaped response to `request_tag`, if its paired response supports it.
    pub fn failure_response(&self, request_tag: &str, error_message: &str) -> Option<Payload> {
        let response_tag = self.schema(request_tag)?.response_tag?;
        let schema = self.schema(&response_tag)?;
        if !schema.error_shaped {
            return None;
        }

        let mut fields = Map::new();
        fields.insert("success".to_string(), Value::Bool(false));
        fields.insert(
            "error_message".to_string(),
            Value::String(error_message.to_string()),
        );
        (schema.decode)(&response_tag, fields).ok()
    }
}
