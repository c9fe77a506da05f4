//! demchange: multi-temporal DEM change surfaces
//!
//! Groups elevation rasters by acquisition, culls rasters with too few valid
//! pixels, mosaics each acquisition and computes the newest-minus-oldest
//! elevation difference together with the day gap behind every pixel.

pub mod types;
pub mod io;
pub mod core;
pub mod config;

// Re-export main types and functions for easier access
pub use types::{BandData, BoundingBox, DemError, DemResult, ElevationGrid, GeoTransform, RasterHandle};
pub use config::PipelineConfig;
pub use io::{FileNameParser, MemoryStore, RasterStore};
#[cfg(feature = "gdal")]
pub use io::GdalStore;
pub use self::core::{
    AcquisitionGrouper, DifferenceEngine, DifferenceOutcome, DifferenceOutputs, ExtentJob,
    StripPipeline, ValidityFilter,
};
