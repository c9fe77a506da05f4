use crate::io::store::RasterStore;
use crate::types::{BandData, DemError, DemResult, ElevationGrid, GeoTransform, RasterHandle, mask_nodata};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// GeoTIFF creation options used for every raster this crate writes
pub(crate) const GTIFF_OPTIONS: [RasterCreationOption<'static>; 3] = [
    RasterCreationOption { key: "COMPRESS", value: "LZW" },
    RasterCreationOption { key: "TILED", value: "YES" },
    RasterCreationOption { key: "BIGTIFF", value: "IF_SAFER" },
];

/// GDAL-backed raster store writing compressed, tiled GeoTIFFs
#[derive(Debug, Default, Clone, Copy)]
pub struct GdalStore;

impl GdalStore {
    pub fn new() -> Self {
        Self
    }

    fn write_typed<T: GdalType + Copy>(
        path: &Path,
        array: &Array2<T>,
        nodata: f64,
        template: &RasterHandle,
    ) -> DemResult<()> {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = array.dim();

        let mut dataset = driver.create_with_band_type_with_options::<T, _>(
            path,
            width as isize,
            height as isize,
            1,
            &GTIFF_OPTIONS,
        )?;

        dataset.set_geo_transform(&template.geo_transform.to_gdal())?;
        if !template.projection.is_empty() {
            dataset.set_projection(&template.projection)?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        rasterband.set_no_data_value(Some(nodata))?;

        let flat_data: Vec<T> = array.iter().copied().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        Ok(())
    }
}

impl RasterStore for GdalStore {
    fn describe(&self, path: &Path) -> DemResult<RasterHandle> {
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let rasterband = dataset.rasterband(1)?;

        Ok(RasterHandle {
            path: path.to_path_buf(),
            width,
            height,
            geo_transform,
            projection: dataset.projection(),
            nodata: rasterband.no_data_value(),
        })
    }

    fn read_elevation(&self, handle: &RasterHandle) -> DemResult<ElevationGrid> {
        log::debug!("Reading elevation from: {}", handle.path.display());

        let dataset = Dataset::open(&handle.path)?;
        let (width, height) = dataset.raster_size();
        let rasterband = dataset.rasterband(1)?;
        let band_data =
            rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let grid = Array2::from_shape_vec((height, width), band_data.data).map_err(|e| {
            DemError::Processing(format!(
                "Failed to reshape {}: {}",
                handle.path.display(),
                e
            ))
        })?;

        Ok(mask_nodata(grid, rasterband.no_data_value()))
    }

    fn write_band(
        &self,
        path: &Path,
        data: &BandData,
        nodata: f64,
        template: &RasterHandle,
    ) -> DemResult<()> {
        log::info!("Saving {} GeoTIFF: {}", data.type_name(), path.display());
        match data {
            BandData::I16(a) => Self::write_typed(path, a, nodata, template),
            BandData::U16(a) => Self::write_typed(path, a, nodata, template),
            BandData::F32(a) => Self::write_typed(path, a, nodata, template),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn rename(&self, from: &Path, to: &Path) -> DemResult<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }
}
