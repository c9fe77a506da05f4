use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Elevation samples, nodata already mapped to NaN
pub type ElevationGrid = Array2<f32>;

/// Axis-aligned extent in the projected coordinates of the rasters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, max_x, min_y, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// True when the two extents share a region of non-zero area
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Number of pixels of size `resolution` needed to cover the extent
    pub fn pixel_count(&self, resolution: f64) -> u64 {
        if resolution <= 0.0 {
            return 0;
        }
        (self.area() / (resolution * resolution)) as u64
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Ground footprint of a `width` x `height` raster (rotation terms ignored)
    pub fn footprint(&self, width: usize, height: usize) -> BoundingBox {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + self.pixel_width * width as f64;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + self.pixel_height * height as f64;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// One opened single-band elevation raster. Only metadata lives here;
/// pixels are read on demand through a [`crate::io::RasterStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHandle {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub geo_transform: GeoTransform,
    /// WKT, empty when the source carries no projection
    pub projection: String,
    pub nodata: Option<f64>,
}

impl RasterHandle {
    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> u64 {
        (self.width as u64) * (self.height as u64)
    }

    pub fn footprint(&self) -> BoundingBox {
        self.geo_transform.footprint(self.width, self.height)
    }

    pub fn file_name(&self) -> String {
        base_name(&self.path)
    }
}

/// Typed pixel payload for writing single-band rasters
#[derive(Debug, Clone, PartialEq)]
pub enum BandData {
    I16(Array2<i16>),
    U16(Array2<u16>),
    F32(Array2<f32>),
}

impl BandData {
    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        match self {
            BandData::I16(a) => a.dim(),
            BandData::U16(a) => a.dim(),
            BandData::F32(a) => a.dim(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BandData::I16(_) => "Int16",
            BandData::U16(_) => "UInt16",
            BandData::F32(_) => "Float32",
        }
    }

    /// Widen to f32, mapping `nodata` (and NaN) to NaN
    pub fn to_elevation(&self, nodata: Option<f64>) -> ElevationGrid {
        let widened = match self {
            BandData::I16(a) => a.mapv(|v| v as f32),
            BandData::U16(a) => a.mapv(|v| v as f32),
            BandData::F32(a) => a.clone(),
        };
        mask_nodata(widened, nodata)
    }
}

/// Replace every `nodata` sample with NaN
pub fn mask_nodata(mut grid: ElevationGrid, nodata: Option<f64>) -> ElevationGrid {
    if let Some(nd) = nodata {
        if !nd.is_nan() {
            let nd = nd as f32;
            grid.mapv_inplace(|v| if v == nd { f32::NAN } else { v });
        }
    }
    grid
}

/// File name without directories, lossy for non-UTF-8 names
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Error types for DEM change processing
#[derive(Debug, thiserror::Error)]
pub enum DemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("found {} strip IDs in {}, expected exactly one", .count, .path.display())]
    AmbiguousStripId { path: PathBuf, count: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error(
        "raster {} is {}x{} but the other rasters are {}x{}",
        .path.display(), .found.1, .found.0, .expected.1, .expected.0
    )]
    DimensionMismatch {
        path: PathBuf,
        /// (rows, cols)
        expected: (usize, usize),
        /// (rows, cols)
        found: (usize, usize),
    },

    #[error("No input rasters: {0}")]
    NoInputs(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for DEM change operations
pub type DemResult<T> = Result<T, DemError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_footprint_north_up() {
        let gt = GeoTransform::north_up(100.0, 500.0, 2.0);
        let bbox = gt.footprint(10, 5);
        assert_eq!(bbox, BoundingBox::new(100.0, 490.0, 120.0, 500.0));
    }

    #[test]
    fn test_bbox_intersection_excludes_touching_edges() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        let c = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(c.intersects(&b));
    }

    #[test]
    fn test_pixel_count_from_area() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 50.0);
        assert_eq!(bbox.pixel_count(2.0), 1250);
        assert_eq!(bbox.pixel_count(0.0), 0);
    }

    #[test]
    fn test_to_elevation_masks_nodata() {
        let band = BandData::I16(array![[1, -9999], [3, 4]]);
        let grid = band.to_elevation(Some(-9999.0));
        assert_eq!(grid[[0, 0]], 1.0);
        assert!(grid[[0, 1]].is_nan());
        assert_eq!(grid[[1, 1]], 4.0);
    }
}
