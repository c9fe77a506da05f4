//! Core change-surface processing modules

pub mod grouping;
pub mod validity;
pub mod idempotent;
pub mod observer;
pub mod mosaic;
pub mod difference;
pub mod pipeline;

// Re-export main types
pub use grouping::{AcquisitionGrouper, AcquisitionKey, GroupingPolicy};
pub use validity::{ValidityFilter, ValidityRecord, ValidityReport};
pub use idempotent::{IdempotentStep, StepOutcome};
pub use observer::{DiffObserver, LogObserver};
pub use mosaic::{mosaic_groups, AlignedCompositor, MosaicCompositor, MosaicOptions, ResampleMethod};
#[cfg(feature = "gdal")]
pub use mosaic::GdalVrtCompositor;
pub use difference::{
    CacheRetention, DatePair, DiffEncoding, DifferenceEngine, DifferenceOutcome, DifferenceOutputs,
    DifferenceSummary,
};
pub use pipeline::{ExtentJob, PipelineOutcome, StripPipeline};
