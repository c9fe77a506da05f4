use crate::types::{BandData, DemResult, ElevationGrid, RasterHandle};
use std::path::Path;

/// Access to single-band rasters on some backing medium.
///
/// Metadata and pixels are fetched separately so that callers can validate
/// geometry (sizes, footprints) before paying for a full read.
pub trait RasterStore {
    /// Open `path` and return its metadata without reading pixels
    fn describe(&self, path: &Path) -> DemResult<RasterHandle>;

    /// Read band 1 as f32 with nodata samples replaced by NaN
    fn read_elevation(&self, handle: &RasterHandle) -> DemResult<ElevationGrid>;

    /// Write a single-band raster with the geotransform and projection of `template`
    fn write_band(
        &self,
        path: &Path,
        data: &BandData,
        nodata: f64,
        template: &RasterHandle,
    ) -> DemResult<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Move a raster; the destination directory must already exist
    fn rename(&self, from: &Path, to: &Path) -> DemResult<()>;
}
