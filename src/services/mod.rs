pub mod artifact;
pub mod classifier;
pub mod humanizer;
pub mod session;
pub mod submission;

pub use artifact::ArtifactValidator;
pub use classifier::FailureClassifier;
pub use humanizer::{Humanizer, TypingSpeed};
pub use session::{SessionHandle, SessionManager, SessionSettings};
pub use submission::{FillMode, SubmissionDriver, SubmissionResult};
