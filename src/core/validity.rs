use crate::io::RasterStore;
use crate::types::{base_name, DemError, DemResult, ElevationGrid};
use std::path::{Path, PathBuf};

/// Name of the ranked validity table written into a working directory
pub const REPORT_FILE_NAME: &str = "dem_valid_percent.txt";

/// Valid-pixel percentage of one raster
#[derive(Debug, Clone, PartialEq)]
pub struct ValidityRecord {
    pub path: PathBuf,
    /// 0-100, relative to the expected pixel count when one was given
    pub valid_percent: f64,
}

/// Rasters ranked by valid percentage, highest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidityReport {
    pub records: Vec<ValidityRecord>,
}

impl ValidityReport {
    pub fn from_records(mut records: Vec<ValidityRecord>) -> Self {
        // stable: equal percentages keep input order
        records.sort_by(|a, b| b.valid_percent.total_cmp(&a.valid_percent));
        Self { records }
    }

    /// Two-column table, `<basename> <percent>` per line
    pub fn to_table(&self) -> String {
        let mut table = String::new();
        for record in &self.records {
            table.push_str(&format!("{} {:.4}\n", base_name(&record.path), record.valid_percent));
        }
        table
    }

    pub fn save(&self, path: &Path) -> DemResult<()> {
        std::fs::write(path, self.to_table())?;
        log::info!("Saved DEM valid pixel percentage to {}", path.display());
        Ok(())
    }

    /// Read a table written by [`ValidityReport::save`]. Paths are rebuilt
    /// as `dir/<basename>`.
    pub fn load(dir: &Path) -> DemResult<Self> {
        let report_path = dir.join(REPORT_FILE_NAME);
        let content = std::fs::read_to_string(&report_path)?;

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(name) = fields.next() else {
                continue;
            };
            let valid_percent = fields
                .next()
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| {
                    DemError::InvalidFormat(format!(
                        "{}:{}: expected `<name> <percent>`",
                        report_path.display(),
                        line_no + 1
                    ))
                })?;
            records.push(ValidityRecord {
                path: dir.join(name),
                valid_percent,
            });
        }
        Ok(Self { records })
    }

    /// Paths at or above `threshold` (all when `None`), in report order
    pub fn kept(&self, threshold: Option<f64>) -> Vec<PathBuf> {
        self.records
            .iter()
            .filter(|r| threshold.map_or(true, |t| r.valid_percent >= t))
            .map(|r| r.path.clone())
            .collect()
    }
}

/// Ranks rasters by valid-pixel percentage and moves aside those below a threshold
#[derive(Debug, Clone, Default)]
pub struct ValidityFilter {
    /// Keep rasters whose percentage is at least this value
    pub keep_threshold: Option<f64>,
    /// Denominator override, e.g. the pixel count of the extent polygon
    pub expected_pixels: Option<u64>,
}

impl ValidityFilter {
    pub fn new(keep_threshold: Option<f64>, expected_pixels: Option<u64>) -> Self {
        Self {
            keep_threshold,
            expected_pixels,
        }
    }

    /// Directory receiving the culled rasters
    pub fn culled_dir(&self, work_dir: &Path) -> Option<PathBuf> {
        self.keep_threshold
            .map(|t| work_dir.join(format!("dem_valid_lt_{:.2}", t)))
    }

    pub fn valid_percent<S: RasterStore + ?Sized>(&self, store: &S, path: &Path) -> DemResult<f64> {
        let handle = store.describe(path)?;
        let grid = store.read_elevation(&handle)?;
        let total = self.expected_pixels.unwrap_or_else(|| handle.pixel_count());
        if total == 0 {
            return Ok(0.0);
        }
        Ok(100.0 * count_valid(&grid) as f64 / total as f64)
    }

    pub fn rank<S: RasterStore + ?Sized>(&self, store: &S, rasters: &[PathBuf]) -> DemResult<ValidityReport> {
        let mut records = Vec::with_capacity(rasters.len());
        for raster in rasters {
            let valid_percent = self.valid_percent(store, raster)?;
            log::debug!("{}: {:.4}% valid", raster.display(), valid_percent);
            records.push(ValidityRecord {
                path: raster.clone(),
                valid_percent,
            });
        }
        Ok(ValidityReport::from_records(records))
    }

    /// Rank `rasters`, save the report into `work_dir` and, with a threshold,
    /// move rasters below it into the culled directory. Returns the kept
    /// rasters in input order.
    pub fn apply<S: RasterStore + ?Sized>(
        &self,
        store: &S,
        rasters: &[PathBuf],
        work_dir: &Path,
    ) -> DemResult<Vec<PathBuf>> {
        std::fs::create_dir_all(work_dir)?;
        let report = self.rank(store, rasters)?;
        report.save(&work_dir.join(REPORT_FILE_NAME))?;

        let (Some(threshold), Some(culled_dir)) = (self.keep_threshold, self.culled_dir(work_dir)) else {
            return Ok(rasters.to_vec());
        };
        std::fs::create_dir_all(&culled_dir)?;

        let mut kept = Vec::with_capacity(rasters.len());
        for raster in rasters {
            let percent = report
                .records
                .iter()
                .find(|r| &r.path == raster)
                .map(|r| r.valid_percent)
                .unwrap_or(0.0);
            if percent < threshold {
                let target = culled_dir.join(base_name(raster));
                log::warn!(
                    "{} has {:.2}% valid pixels (< {:.2}), moving to {}",
                    raster.display(),
                    percent,
                    threshold,
                    culled_dir.display()
                );
                store.rename(raster, &target)?;
            } else {
                kept.push(raster.clone());
            }
        }
        log::info!("Kept {} of {} rasters", kept.len(), rasters.len());
        Ok(kept)
    }
}

/// Number of samples that are not NaN
pub fn count_valid(grid: &ElevationGrid) -> usize {
    #[cfg(feature = "parallel")]
    {
        use ndarray::parallel::prelude::*;
        grid.par_iter().filter(|v| !v.is_nan()).count()
    }
    #[cfg(not(feature = "parallel"))]
    {
        grid.iter().filter(|v| !v.is_nan()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryStore;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn grid_with_holes(holes: usize) -> Array2<f32> {
        let mut grid = Array2::from_elem((4, 5), 10.0f32);
        for (i, v) in grid.iter_mut().enumerate() {
            if i < holes {
                *v = f32::NAN;
            }
        }
        grid
    }

    fn store_with(dir: &Path, rasters: &[(&str, usize)]) -> (MemoryStore, Vec<PathBuf>) {
        let store = MemoryStore::new();
        let mut paths = Vec::new();
        for (name, holes) in rasters {
            let path = dir.join(name);
            store.insert_elevation(&path, grid_with_holes(*holes), GeoTransform::north_up(0.0, 4.0, 1.0), None);
            paths.push(path);
        }
        (store, paths)
    }

    #[test]
    fn test_valid_percent_with_expected_pixels() {
        let dir = TempDir::new().unwrap();
        let (store, paths) = store_with(dir.path(), &[("a.tif", 5)]);

        let own = ValidityFilter::new(None, None);
        assert_relative_eq!(own.valid_percent(&store, &paths[0]).unwrap(), 75.0);

        let footprint = ValidityFilter::new(None, Some(30));
        assert_relative_eq!(footprint.valid_percent(&store, &paths[0]).unwrap(), 50.0);
    }

    #[test]
    fn test_report_sorted_descending_and_reloadable() {
        let dir = TempDir::new().unwrap();
        let (store, paths) = store_with(dir.path(), &[("low.tif", 15), ("high.tif", 0), ("mid.tif", 10)]);

        let filter = ValidityFilter::new(None, None);
        let kept = filter.apply(&store, &paths, dir.path()).unwrap();
        assert_eq!(kept, paths);

        let table = std::fs::read_to_string(dir.path().join(REPORT_FILE_NAME)).unwrap();
        assert_eq!(table, "high.tif 100.0000\nmid.tif 50.0000\nlow.tif 25.0000\n");

        let report = ValidityReport::load(dir.path()).unwrap();
        assert_eq!(report.records[0].path, dir.path().join("high.tif"));
        assert_eq!(report.kept(Some(50.0)).len(), 2);
    }

    #[test]
    fn test_cull_moves_rasters_below_threshold() {
        let dir = TempDir::new().unwrap();
        let (store, paths) = store_with(dir.path(), &[("a.tif", 0), ("b.tif", 16), ("c.tif", 14)]);

        // a: 100%, b: 20%, c: 30%
        let filter = ValidityFilter::new(Some(30.0), None);
        let kept = filter.apply(&store, &paths, dir.path()).unwrap();
        assert_eq!(kept, vec![paths[0].clone(), paths[2].clone()]);

        let culled = dir.path().join("dem_valid_lt_30.00").join("b.tif");
        assert!(store.exists(&culled));
        assert!(!store.exists(&paths[1]));
        assert!(dir.path().join("dem_valid_lt_30.00").is_dir());
    }

    #[test]
    fn test_load_rejects_malformed_rows() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(REPORT_FILE_NAME), "a.tif 12.5\nb.tif\n").unwrap();
        assert!(ValidityReport::load(dir.path()).is_err());
    }
}
