//! Message catalogue exchanged between the console and the processing server.
//!
//! Each request names its paired response through [`Request::Response`].
//! Four of the five responses are [`Outcome`]s (`success` + `error_message`);
//! `UpdateAntennaSampleResponse` carries registration results instead.

mod antenna;
mod catalogue;
mod geometry;

pub use antenna::{CgsClock, CgsSample};
pub use catalogue::{
    CatalogueMessage, CustomPayload, InitContinuousRegistrationRequest,
    InitContinuousRegistrationResponse, LoadPlanningDataRequest, LoadPlanningDataResponse,
    Outcome, Payload, Request, StartRegistrationRequest, StartRegistrationResponse,
    StopRegistrationRequest, StopRegistrationResponse, UpdateAntennaSampleRequest,
    UpdateAntennaSampleResponse, LEGACY_INIT_REQUEST_TAG, LEGACY_INIT_RESPONSE_TAG,
};
pub use geometry::{Lumen, TranslationVector, Vector3};
