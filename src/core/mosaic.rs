//! Merging several rasters of one acquisition into a single raster.
//!
//! The actual warp is delegated: with GDAL available the merge goes through a
//! virtual mosaic (`gdalbuildvrt`) materialized as a GeoTIFF. Rasters that
//! already sit on a common grid can be merged in-crate without resampling.

use crate::core::grouping::AcquisitionKey;
use crate::core::idempotent::{IdempotentStep, StepOutcome};
use crate::io::{save_source_list, RasterStore};
use crate::types::{BandData, BoundingBox, DemError, DemResult, GeoTransform, RasterHandle};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Nodata written by the aligned compositor when the inputs declare none
pub const MOSAIC_NODATA: f64 = -9999.0;

/// Resampling method requested from the compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleMethod {
    Nearest,
    Bilinear,
    #[default]
    Average,
}

impl ResampleMethod {
    /// Name understood by GDAL's `-r` option
    pub fn as_gdal(&self) -> &'static str {
        match self {
            ResampleMethod::Nearest => "nearest",
            ResampleMethod::Bilinear => "bilinear",
            ResampleMethod::Average => "average",
        }
    }
}

impl FromStr for ResampleMethod {
    type Err = DemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "near" | "nearest" => Ok(ResampleMethod::Nearest),
            "bilinear" => Ok(ResampleMethod::Bilinear),
            "average" => Ok(ResampleMethod::Average),
            _ => Err(DemError::InvalidFormat(format!("Invalid resample method: {}", s))),
        }
    }
}

/// Options passed to a compositor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MosaicOptions {
    pub resample: ResampleMethod,
    /// Output pixel size; `None` keeps the input resolution
    pub pixel_size: Option<f64>,
    /// Output footprint; `None` covers the union of the inputs. Inputs are
    /// clipped to it and uncovered pixels are nodata.
    pub extent: Option<BoundingBox>,
}

/// Produces one single-band raster with declared nodata covering
/// `options.extent`, or the union footprint of `inputs` without one
pub trait MosaicCompositor {
    fn composite(&self, inputs: &[PathBuf], output: &Path, options: &MosaicOptions) -> DemResult<()>;
}

/// Compositor for inputs that share pixel size and grid alignment.
///
/// No interpolation takes place. Overlapping valid samples are merged with
/// the mean for [`ResampleMethod::Average`]; otherwise the first valid sample
/// in input order is kept.
pub struct AlignedCompositor<'a, S: RasterStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RasterStore + ?Sized> AlignedCompositor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn output_grid(handles: &[RasterHandle], options: &MosaicOptions) -> DemResult<(GeoTransform, usize, usize)> {
        let first = handles
            .first()
            .ok_or_else(|| DemError::NoInputs("mosaic needs at least one raster".to_string()))?;
        let gt = first.geo_transform;
        let tolerance = gt.pixel_width.abs() * 1e-6;

        if let Some(size) = options.pixel_size {
            if (size - gt.pixel_width.abs()).abs() > tolerance {
                return Err(DemError::Processing(format!(
                    "changing pixel size {} -> {} requires an external warp",
                    gt.pixel_width, size
                )));
            }
        }

        for handle in handles {
            let other = handle.geo_transform;
            if other.rotation_x != 0.0 || other.rotation_y != 0.0 {
                return Err(DemError::Processing(format!(
                    "{} is rotated; aligned mosaicking needs north-up rasters",
                    handle.path.display()
                )));
            }
            if (other.pixel_width - gt.pixel_width).abs() > tolerance
                || (other.pixel_height - gt.pixel_height).abs() > tolerance
            {
                return Err(DemError::Processing(format!(
                    "{} has pixel size {}x{}, expected {}x{}",
                    handle.path.display(),
                    other.pixel_width,
                    other.pixel_height,
                    gt.pixel_width,
                    gt.pixel_height
                )));
            }
        }

        let bounds = match options.extent {
            Some(extent) => extent,
            None => {
                let mut union = BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
                for handle in handles {
                    let fp = handle.footprint();
                    union.min_x = union.min_x.min(fp.min_x);
                    union.max_x = union.max_x.max(fp.max_x);
                    union.min_y = union.min_y.min(fp.min_y);
                    union.max_y = union.max_y.max(fp.max_y);
                }
                union
            }
        };

        let grid = GeoTransform {
            top_left_x: bounds.min_x,
            top_left_y: bounds.max_y,
            ..gt
        };
        let width = (bounds.width() / gt.pixel_width.abs()).round() as usize;
        let height = (bounds.height() / gt.pixel_height.abs()).round() as usize;
        if width == 0 || height == 0 {
            return Err(DemError::Processing(format!(
                "mosaic extent {:?} is smaller than one pixel",
                bounds
            )));
        }
        Ok((grid, width, height))
    }

    /// (row, col) of `handle`'s top-left pixel relative to the output grid;
    /// negative when the raster starts before the grid
    fn offset_in(grid: &GeoTransform, handle: &RasterHandle) -> DemResult<(i64, i64)> {
        let col = (handle.geo_transform.top_left_x - grid.top_left_x) / grid.pixel_width.abs();
        let row = (grid.top_left_y - handle.geo_transform.top_left_y) / grid.pixel_height.abs();
        let aligned = |v: f64| (v - v.round()).abs() < 1e-3;
        if !aligned(col) || !aligned(row) {
            return Err(DemError::Processing(format!(
                "{} is not aligned with the mosaic grid (offset {:.3}, {:.3} pixels)",
                handle.path.display(),
                col,
                row
            )));
        }
        Ok((row.round() as i64, col.round() as i64))
    }
}

/// Source and destination index ranges of a raster of `len` pixels placed at
/// `offset` on an axis of `extent` pixels; `None` when they do not overlap
fn clip_axis(offset: i64, len: usize, extent: usize) -> Option<(Range<usize>, Range<usize>)> {
    let start = offset.max(0);
    let end = (offset + len as i64).min(extent as i64);
    if start >= end {
        return None;
    }
    let dst = start as usize..end as usize;
    let src = (start - offset) as usize..(end - offset) as usize;
    Some((src, dst))
}

impl<'a, S: RasterStore + ?Sized> MosaicCompositor for AlignedCompositor<'a, S> {
    fn composite(&self, inputs: &[PathBuf], output: &Path, options: &MosaicOptions) -> DemResult<()> {
        let handles = inputs
            .iter()
            .map(|p| self.store.describe(p))
            .collect::<DemResult<Vec<_>>>()?;
        let (grid, width, height) = Self::output_grid(&handles, options)?;
        log::info!(
            "Mosaicking {} rasters into {}x{} grid: {}",
            handles.len(),
            width,
            height,
            output.display()
        );

        let mut sum = Array2::<f32>::zeros((height, width));
        let mut count = Array2::<u32>::zeros((height, width));
        let keep_first = options.resample != ResampleMethod::Average;

        for handle in &handles {
            let (row, col) = Self::offset_in(&grid, handle)?;
            let (rows, cols) = handle.dim();
            let (Some((src_rows, dst_rows)), Some((src_cols, dst_cols))) =
                (clip_axis(row, rows, height), clip_axis(col, cols, width))
            else {
                log::debug!("{} is outside the mosaic extent", handle.path.display());
                continue;
            };
            let data = self.store.read_elevation(handle)?;
            Zip::from(sum.slice_mut(s![dst_rows.clone(), dst_cols.clone()]))
                .and(count.slice_mut(s![dst_rows, dst_cols]))
                .and(data.slice(s![src_rows, src_cols]))
                .for_each(|acc, n, &v| {
                    if v.is_nan() || (keep_first && *n > 0) {
                        return;
                    }
                    *acc += v;
                    *n += 1;
                });
        }

        let nodata = handles[0].nodata.filter(|v| !v.is_nan()).unwrap_or(MOSAIC_NODATA);
        let merged = Zip::from(&sum)
            .and(&count)
            .map_collect(|&acc, &n| if n == 0 { nodata as f32 } else { acc / n as f32 });

        let template = RasterHandle {
            path: output.to_path_buf(),
            width,
            height,
            geo_transform: grid,
            projection: handles[0].projection.clone(),
            nodata: Some(nodata),
        };
        self.store
            .write_band(output, &BandData::F32(merged), nodata, &template)
    }
}

/// Mosaic every group into `out_dir/<key>.tif`.
///
/// Existing mosaics are reused. A group whose mosaic fails is logged and left
/// out. With `save_sources`, the members of each new mosaic are listed in
/// `out_dir/<key>_src.txt`.
pub fn mosaic_groups<S, C>(
    store: &S,
    compositor: &C,
    groups: &[(AcquisitionKey, Vec<PathBuf>)],
    out_dir: &Path,
    options: &MosaicOptions,
    save_sources: bool,
) -> DemResult<Vec<PathBuf>>
where
    S: RasterStore + ?Sized,
    C: MosaicCompositor + ?Sized,
{
    std::fs::create_dir_all(out_dir)?;
    let mut mosaics = Vec::with_capacity(groups.len());

    for (key, members) in groups {
        let output = out_dir.join(key.mosaic_file_name());
        let step = IdempotentStep::single(format!("mosaic {}", key), output.clone());
        let result = step.run(store, |staging| {
            if save_sources {
                save_source_list(&out_dir.join(key.source_list_name()), members)?;
            }
            compositor.composite(members, &staging.path_for(&output)?, options)
        });

        match result {
            Ok(StepOutcome::Skipped) | Ok(StepOutcome::Produced(())) => mosaics.push(output),
            Err(e) => log::warn!("warning, mosaic for {} failed: {}", key, e),
        }
    }
    Ok(mosaics)
}

#[cfg(feature = "gdal")]
pub use self::gdal_vrt::GdalVrtCompositor;

#[cfg(feature = "gdal")]
mod gdal_vrt {
    use super::{MosaicCompositor, MosaicOptions};
    use crate::io::gdal_store::GTIFF_OPTIONS;
    use crate::types::DemResult;
    use gdal::programs::raster::{build_vrt, BuildVRTOptions};
    use gdal::{Dataset, DriverManager};
    use std::path::{Path, PathBuf};

    /// Compositor backed by GDAL's virtual mosaic builder
    #[derive(Debug, Default, Clone, Copy)]
    pub struct GdalVrtCompositor;

    impl MosaicCompositor for GdalVrtCompositor {
        fn composite(&self, inputs: &[PathBuf], output: &Path, options: &MosaicOptions) -> DemResult<()> {
            log::info!("Building mosaic of {} rasters: {}", inputs.len(), output.display());

            let datasets = inputs
                .iter()
                .map(Dataset::open)
                .collect::<Result<Vec<_>, _>>()?;

            let mut args = vec!["-r".to_string(), options.resample.as_gdal().to_string()];
            if let Some(size) = options.pixel_size {
                args.extend(["-tr".to_string(), size.to_string(), size.to_string()]);
                args.push("-tap".to_string());
            }
            if let Some(extent) = options.extent {
                args.push("-te".to_string());
                args.extend(
                    [extent.min_x, extent.min_y, extent.max_x, extent.max_y]
                        .iter()
                        .map(|v| v.to_string()),
                );
            }
            let vrt = build_vrt(None, &datasets, Some(BuildVRTOptions::new(args)?))?;

            let driver = DriverManager::get_driver_by_name("GTiff")?;
            vrt.create_copy(&driver, output, &GTIFF_OPTIONS)?;
            Ok(())
        }
    }
}
