pub mod llm;
pub mod documents;
pub mod statement;
pub mod validation;
pub mod series;
pub mod runner; // Orchestrator: documents → extract → validate → snapshot
pub mod sampler;
pub mod context;

pub use runner::{ExtractionPipeline, PipelineError, RunSummary};
pub use sampler::{sample, SampledContext, SamplingStrategy};
