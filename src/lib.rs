// ABOUTME: Library root for replica-sync
// ABOUTME: Exposes the read, diff, transform and write stages and the driver that runs them

pub mod diff;
pub mod error;
pub mod phoenix;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod transform;
pub mod writer;

pub use diff::{compare_data, DiffPolicy, DiffStats};
pub use error::{exit_code_for, EtlError, Store};
pub use pipeline::{run_pipeline, PipelineConfig, RecordReader, RunOutcome};
pub use record::{Field, Projection, SessionRecord, TransformedRecord};
pub use transform::transform_data;
pub use writer::{write_to_phoenix, UpsertParam, UpsertSession, UpsertTarget, WriteReport};
