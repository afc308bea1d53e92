pub mod attempt;
pub mod diagnosis;
pub mod request;

pub use attempt::{BatchReport, GenerationAttempt, RequestOutcome};
pub use diagnosis::{Diagnosis, Remediation};
pub use request::{load_requests, parse_requests, ContentType, GenerationRequest, PromptRecord};
