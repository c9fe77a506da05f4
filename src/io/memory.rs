use crate::io::store::RasterStore;
use crate::types::{BandData, DemError, DemResult, ElevationGrid, GeoTransform, RasterHandle};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

struct MemoryRaster {
    handle: RasterHandle,
    data: BandData,
}

/// In-process raster store keyed by path.
///
/// Nothing touches the disk. Reads are counted so callers can check
/// how often pixel data was actually fetched.
#[derive(Default)]
pub struct MemoryStore {
    rasters: RefCell<HashMap<PathBuf, MemoryRaster>>,
    reads: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an f32 elevation raster. NaN cells are treated as nodata
    /// unless an explicit `nodata` value is given.
    pub fn insert_elevation<P: AsRef<Path>>(
        &self,
        path: P,
        data: ElevationGrid,
        geo_transform: GeoTransform,
        nodata: Option<f64>,
    ) {
        self.insert(path, BandData::F32(data), geo_transform, "", nodata);
    }

    pub fn insert<P: AsRef<Path>>(
        &self,
        path: P,
        data: BandData,
        geo_transform: GeoTransform,
        projection: &str,
        nodata: Option<f64>,
    ) {
        let path = path.as_ref().to_path_buf();
        let (height, width) = data.dim();
        let handle = RasterHandle {
            path: path.clone(),
            width,
            height,
            geo_transform,
            projection: projection.to_string(),
            nodata,
        };
        self.rasters
            .borrow_mut()
            .insert(path, MemoryRaster { handle, data });
    }

    /// Stored payload and nodata value, as written
    pub fn band(&self, path: &Path) -> Option<(BandData, Option<f64>)> {
        self.rasters
            .borrow()
            .get(path)
            .map(|r| (r.data.clone(), r.handle.nodata))
    }

    /// Number of `read_elevation` calls served so far
    pub fn read_count(&self) -> usize {
        self.reads.get()
    }

    pub fn len(&self) -> usize {
        self.rasters.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.borrow().is_empty()
    }
}

impl RasterStore for MemoryStore {
    fn describe(&self, path: &Path) -> DemResult<RasterHandle> {
        self.rasters
            .borrow()
            .get(path)
            .map(|r| r.handle.clone())
            .ok_or_else(|| DemError::InvalidFormat(format!("no raster at {}", path.display())))
    }

    fn read_elevation(&self, handle: &RasterHandle) -> DemResult<ElevationGrid> {
        let rasters = self.rasters.borrow();
        let raster = rasters.get(&handle.path).ok_or_else(|| {
            DemError::InvalidFormat(format!("no raster at {}", handle.path.display()))
        })?;
        self.reads.set(self.reads.get() + 1);
        Ok(raster.data.to_elevation(raster.handle.nodata))
    }

    fn write_band(
        &self,
        path: &Path,
        data: &BandData,
        nodata: f64,
        template: &RasterHandle,
    ) -> DemResult<()> {
        log::debug!("Storing {} raster in memory: {}", data.type_name(), path.display());
        self.insert(
            path,
            data.clone(),
            template.geo_transform,
            &template.projection,
            Some(nodata),
        );
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.rasters.borrow().contains_key(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> DemResult<()> {
        let mut rasters = self.rasters.borrow_mut();
        let mut raster = rasters.remove(from).ok_or_else(|| {
            DemError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no raster at {}", from.display()),
            ))
        })?;
        raster.handle.path = to.to_path_buf();
        rasters.insert(to.to_path_buf(), raster);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_read_masks_declared_nodata() {
        let store = MemoryStore::new();
        store.insert_elevation(
            "a.tif",
            array![[1.0, -9999.0], [f32::NAN, 4.0]],
            GeoTransform::north_up(0.0, 2.0, 1.0),
            Some(-9999.0),
        );

        let handle = store.describe(Path::new("a.tif")).unwrap();
        assert_eq!(handle.dim(), (2, 2));

        let grid = store.read_elevation(&handle).unwrap();
        assert!(grid[[0, 1]].is_nan());
        assert!(grid[[1, 0]].is_nan());
        assert_eq!(grid[[1, 1]], 4.0);
        assert_eq!(store.read_count(), 1);
    }

    #[test]
    fn test_rename_moves_entry() {
        let store = MemoryStore::new();
        store.insert_elevation(
            "dir/a.tif",
            array![[1.0]],
            GeoTransform::north_up(0.0, 1.0, 1.0),
            None,
        );
        store
            .rename(Path::new("dir/a.tif"), Path::new("other/a.tif"))
            .unwrap();

        assert!(!store.exists(Path::new("dir/a.tif")));
        let handle = store.describe(Path::new("other/a.tif")).unwrap();
        assert_eq!(handle.path, PathBuf::from("other/a.tif"));
        assert!(store.rename(Path::new("dir/a.tif"), Path::new("x.tif")).is_err());
    }
}
