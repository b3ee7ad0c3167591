//! The fixed message catalogue and the `Payload` enum over it.
//!
//! Every catalogue struct maps one-to-one onto a wire type tag (the struct
//! name). Types registered at runtime without a Rust struct travel as
//! [`Payload::Custom`].

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::antenna::{CgsClock, CgsSample};
use super::geometry::{Lumen, TranslationVector, Vector3};

/// A catalogue message with a fixed type tag.
pub trait CatalogueMessage:
    Serialize + DeserializeOwned + Into<Payload> + TryFrom<Payload, Error = Payload> + Send + 'static
{
    /// Wire type tag.
    const TYPE_TAG: &'static str;

    /// Whether the schema carries `success` and `error_message`, so a handler
    /// failure can be reported in-band.
    const ERROR_SHAPED: bool;
}

/// A request type and the response type that answers it.
pub trait Request: CatalogueMessage {
    type Response: CatalogueMessage;
}

/// Response carrying a success flag and an error message.
pub trait Outcome: CatalogueMessage {
    fn ok() -> Self;
    fn failed(message: impl Into<String>) -> Self;
    fn is_success(&self) -> bool;
}

/// Payload of a runtime-registered type with no catalogue struct.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomPayload {
    pub type_tag: String,
    pub fields: Map<String, Value>,
}

impl CustomPayload {
    pub fn new(type_tag: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            type_tag: type_tag.into(),
            fields,
        }
    }
}

macro_rules! catalogue {
    (
        outcomes: [$($outcome:ident),* $(,)?],
        messages: [$($message:ident),* $(,)?] $(,)?
    ) => {
        /// Decoded message payload, one variant per catalogue type.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Payload {
            $( $outcome($outcome), )*
            $( $message($message), )*
            Custom(CustomPayload),
        }

        impl Payload {
            /// Canonical wire type tag of this payload.
            pub fn type_tag(&self) -> &str {
                match self {
                    $( Payload::$outcome(_) => $outcome::TYPE_TAG, )*
                    $( Payload::$message(_) => $message::TYPE_TAG, )*
                    Payload::Custom(custom) => &custom.type_tag,
                }
            }

            /// Payload fields as a JSON object, ready to be flattened into a frame.
            pub fn to_fields(&self) -> serde_json::Result<Map<String, Value>> {
                let value = match self {
                    $( Payload::$outcome(inner) => serde_json::to_value(inner)?, )*
                    $( Payload::$message(inner) => serde_json::to_value(inner)?, )*
                    Payload::Custom(custom) => return Ok(custom.fields.clone()),
                };
                match value {
                    Value::Object(fields) => Ok(fields),
                    other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                        "payload {} did not serialize to an object: {}",
                        self.type_tag(),
                        other
                    ))),
                }
            }
        }

        $(
            impl CatalogueMessage for $outcome {
                const TYPE_TAG: &'static str = stringify!($outcome);
                const ERROR_SHAPED: bool = true;
            }

            impl Outcome for $outcome {
                fn ok() -> Self {
                    Self { success: true, error_message: String::new() }
                }

                fn failed(message: impl Into<String>) -> Self {
                    Self { success: false, error_message: message.into() }
                }

                fn is_success(&self) -> bool {
                    self.success
                }
            }

            catalogue!(@conversions $outcome);
        )*

        $(
            impl CatalogueMessage for $message {
                const TYPE_TAG: &'static str = stringify!($message);
                const ERROR_SHAPED: bool = false;
            }

            catalogue!(@conversions $message);
        )*
    };

    (@conversions $ty:ident) => {
        impl From<$ty> for Payload {
            fn from(message: $ty) -> Self {
                Payload::$ty(message)
            }
        }

        impl TryFrom<Payload> for $ty {
            type Error = Payload;

            fn try_from(payload: Payload) -> Result<Self, Payload> {
                match payload {
                    Payload::$ty(message) => Ok(message),
                    other => Err(other),
                }
            }
        }
    };
}

catalogue! {
    outcomes: [
        InitContinuousRegistrationResponse,
        LoadPlanningDataResponse,
        StartRegistrationResponse,
        StopRegistrationResponse,
    ],
    messages: [
        InitContinuousRegistrationRequest,
        LoadPlanningDataRequest,
        StartRegistrationRequest,
        StopRegistrationRequest,
        UpdateAntennaSampleRequest,
        UpdateAntennaSampleResponse,
    ],
}

impl Request for InitContinuousRegistrationRequest {
    type Response = InitContinuousRegistrationResponse;
}

impl Request for LoadPlanningDataRequest {
    type Response = LoadPlanningDataResponse;
}

impl Request for StartRegistrationRequest {
    type Response = StartRegistrationResponse;
}

impl Request for StopRegistrationRequest {
    type Response = StopRegistrationResponse;
}

impl Request for UpdateAntennaSampleRequest {
    type Response = UpdateAntennaSampleResponse;
}

/// Spelling of the init tags used by the original console build.
pub const LEGACY_INIT_REQUEST_TAG: &str = "InitContinuesRegistrationRequest";
/// See [`LEGACY_INIT_REQUEST_TAG`].
pub const LEGACY_INIT_RESPONSE_TAG: &str = "InitContinuesRegistrationResponse";

/// Prepares the processing server for a continuous registration session.
/// `shared_memory_name` names the segment the video producer writes frames to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitContinuousRegistrationRequest {
    pub configuration_dir_path: String,
    pub catheter_calibration_path: String,
    pub log_file_path: String,
    pub shared_memory_name: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub color_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitContinuousRegistrationResponse {
    pub success: bool,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPlanningDataRequest {
    pub skeleton_dir_path: String,
    pub data_dir_file_path: String,
    pub target_position: Vector3,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPlanningDataResponse {
    pub success: bool,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRegistrationRequest {
    pub pst1_position: TranslationVector,
    pub pst2_position: TranslationVector,
    pub pst3_position: TranslationVector,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRegistrationResponse {
    pub success: bool,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StopRegistrationRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopRegistrationResponse {
    pub success: bool,
    pub error_message: String,
}

/// One antenna reading, stamped with the console clock (`pc_time`, epoch
/// seconds) and the tracker clock.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateAntennaSampleRequest {
    #[serde(deserialize_with = "lenient_pc_time")]
    pub pc_time: i64,
    pub cgs_time: CgsClock,
    pub cgs_sample: CgsSample,
}

/// Registration result for one antenna sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateAntennaSampleResponse {
    #[serde(deserialize_with = "lenient_pc_time")]
    pub pc_time: i64,
    pub cgs_time: CgsClock,
    /// Seconds spent processing the sample.
    pub process_time: f64,
    /// Catheter tip pose in CT space, row-major.
    pub lg_ct_position: Vec<Vec<f64>>,
    pub node_id: i64,
    pub lumens: Vec<Lumen>,
    pub selections: Vec<Lumen>,
}

/// Some producers stamp `pc_time` as a string (empty when unset). Accept
/// integers, floats and numeric strings; always emit an integer.
fn lenient_pc_time<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(value),
        Raw::Float(value) => Ok(value as i64),
        Raw::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(0);
            }
            text.parse::<i64>()
                .or_else(|_| text.parse::<f64>().map(|value| value as i64))
                .map_err(|_| de::Error::custom(format!("invalid pc_time {:?}", text)))
        }
    }
}
