pub mod extract;
pub mod normalize;
pub mod pipeline;
pub mod recognizer;
pub mod structuring;
pub mod types;

pub use extract::HeuristicExtractor;
pub use normalize::normalize;
pub use pipeline::{ErrorClass, PipelineError, ReceiptPipeline, DEFAULT_MAX_CONCURRENT};
pub use recognizer::{MockRecognizer, OcrBackend, RecognitionError, RemoteRecognizer};
pub use structuring::{LlmStructurer, StructuringError, TextToTransaction};
pub use types::{FailureKind, RecognitionParams, RecognitionResponse, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
