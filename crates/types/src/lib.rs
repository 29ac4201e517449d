//! Shared type definitions for the Conduit gateway.
//!
//! Configuration documents live in [`catalog`]; dispatch records, results and
//! error classifications live in [`record`].

pub mod catalog;
pub mod record;

pub use catalog::{
    AuthStrategy, AuthStrategyKind, CatalogDocument, EndpointDocument, EnvironmentDocument, ExtractionRule, FieldRule,
    HeaderRule, MAX_TARGET_INDEX, MappingDocument, ProviderDocument, RetryPolicy, SignatureEncoding, SignatureTarget,
};
pub use record::{
    DispatchRecord, DispatchResult, DispatchStage, ErrorKind, Outcome, ParseOutcomeError, ParseSubjectError,
    RecordId, RecordedError, RecordedRequest, RecordedResponse, ReplayInputs, Subject, new_record_id,
};
