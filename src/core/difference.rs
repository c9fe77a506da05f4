//! Newest-minus-oldest DEM differencing.
//!
//! Every pair of acquisition dates is differenced, widest temporal baseline
//! first. A cell takes its value from the first pair that has valid data at
//! that cell and is never overwritten afterwards, so each pixel compares the
//! oldest and newest acquisitions that are actually valid there (as far as the
//! pair ordering allows). Processing stops as soon as every cell is filled.

use crate::core::grouping::{AcquisitionGrouper, GroupingPolicy};
use crate::core::idempotent::IdempotentStep;
use crate::core::observer::{DiffObserver, LogObserver};
use crate::io::{save_manifest, RasterStore};
use crate::types::{BandData, DemError, DemResult, ElevationGrid, RasterHandle};
use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Nodata of the centimeter (Int16) difference raster
pub const CM_NODATA: i16 = i16::MAX;
/// Nodata of the floating (Float32) difference raster
pub const FLOAT_NODATA: f32 = -9999.0;
/// Nodata of the day-gap raster; no real pair has a zero gap
pub const DAY_GAP_NODATA: u16 = 0;
/// Elevation units to centimeters
pub const CM_SCALE: f64 = 100.0;
/// Largest magnitude, in centimeters, stored on the Int16 path
pub const CM_LIMIT: f64 = 32767.0;
/// Slack on [`CM_LIMIT`] for Float32 representation error, in centimeters
const CM_TOLERANCE: f64 = 0.01;
/// Exact-day grouping written next to the outputs of a flat-list run
pub const DATE_MANIFEST_FILE_NAME: &str = "dem_date_for_diff.txt";

/// Two distinct acquisition dates and the days between them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatePair {
    pub older: NaiveDate,
    pub newer: NaiveDate,
    pub day_gap: u16,
}

impl DatePair {
    pub fn new(a: NaiveDate, b: NaiveDate) -> DemResult<Self> {
        let (older, newer) = if a <= b { (a, b) } else { (b, a) };
        if older == newer {
            return Err(DemError::Processing(format!(
                "cannot pair acquisition date {} with itself",
                older
            )));
        }
        let days = (newer - older).num_days();
        let day_gap = u16::try_from(days).map_err(|_| {
            DemError::Processing(format!(
                "day gap between {} and {} ({} days) does not fit UInt16",
                older, newer, days
            ))
        })?;
        Ok(Self {
            older,
            newer,
            day_gap,
        })
    }
}

/// All pairs of distinct dates, largest day gap first.
///
/// Pairs are enumerated over the ascending dates as (0,1), (0,2), .., (1,2), ..
/// and stably sorted, so pairs with equal gaps keep that order.
pub fn enumerate_pairs(dates: &[NaiveDate]) -> DemResult<Vec<DatePair>> {
    let mut dates = dates.to_vec();
    dates.sort();
    dates.dedup();

    let mut pairs = Vec::with_capacity(dates.len() * dates.len().saturating_sub(1) / 2);
    for (i, &older) in dates.iter().enumerate() {
        for &newer in &dates[i + 1..] {
            pairs.push(DatePair::new(older, newer)?);
        }
    }
    pairs.sort_by(|a, b| b.day_gap.cmp(&a.day_gap));
    Ok(pairs)
}

/// When a date's elevation array leaves the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRetention {
    /// Drop an array once no unprocessed pair references its date
    #[default]
    EvictWhenDone,
    /// Keep every loaded array until the run ends
    KeepAll,
}

/// Per-run cache of elevation arrays keyed by acquisition date
pub struct DateArrayCache {
    retention: CacheRetention,
    arrays: HashMap<NaiveDate, ElevationGrid>,
    /// Unprocessed pairs referencing each date
    pending: HashMap<NaiveDate, usize>,
    loads: usize,
}

impl DateArrayCache {
    pub fn new(retention: CacheRetention, pairs: &[DatePair]) -> Self {
        let mut pending = HashMap::new();
        for pair in pairs {
            *pending.entry(pair.older).or_insert(0) += 1;
            *pending.entry(pair.newer).or_insert(0) += 1;
        }
        Self {
            retention,
            arrays: HashMap::new(),
            pending,
            loads: 0,
        }
    }

    /// Load `date` with `loader` unless it is already resident
    pub fn ensure<F>(&mut self, date: NaiveDate, loader: F) -> DemResult<()>
    where
        F: FnOnce() -> DemResult<ElevationGrid>,
    {
        if !self.arrays.contains_key(&date) {
            let array = loader()?;
            self.arrays.insert(date, array);
            self.loads += 1;
        }
        Ok(())
    }

    pub fn get(&self, date: NaiveDate) -> DemResult<&ElevationGrid> {
        self.arrays
            .get(&date)
            .ok_or_else(|| DemError::Processing(format!("elevation for {} is not loaded", date)))
    }

    /// Mark `pair` as processed, evicting dates no remaining pair needs
    pub fn release(&mut self, pair: &DatePair) {
        for date in [pair.older, pair.newer] {
            let remaining = match self.pending.get_mut(&date) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };
            if remaining == 0 && self.retention == CacheRetention::EvictWhenDone {
                if self.arrays.remove(&date).is_some() {
                    log::debug!("Evicted elevation for {} from cache", date);
                }
            }
        }
    }

    /// Arrays currently held
    pub fn resident(&self) -> usize {
        self.arrays.len()
    }

    /// Arrays loaded over the cache's lifetime
    pub fn loads(&self) -> usize {
        self.loads
    }
}

/// On-disk encoding of the difference raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffEncoding {
    /// Int16 centimeters, nodata [`CM_NODATA`]
    Centimeters,
    /// Float32 in source units, nodata [`FLOAT_NODATA`]
    Float,
}

/// Min and max of the non-NaN values, `None` if there are none
pub fn nan_min_max<T: Float>(values: impl IntoIterator<Item = T>) -> Option<(T, T)> {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Pick Int16 centimeters when every scaled value lies within
/// [-[`CM_LIMIT`], [`CM_LIMIT`]], boundaries included, else Float32.
/// Values are compared before rounding. Also returns the scaled range.
pub fn choose_encoding(values: &Array2<f32>) -> (DiffEncoding, Option<(f64, f64)>) {
    let range = nan_min_max(values.iter().map(|&v| v as f64 * CM_SCALE));
    let encoding = match range {
        Some((lo, hi)) if lo < -CM_LIMIT - CM_TOLERANCE || hi > CM_LIMIT + CM_TOLERANCE => {
            DiffEncoding::Float
        }
        _ => DiffEncoding::Centimeters,
    };
    (encoding, range)
}

/// Difference raster ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedDifference {
    pub encoding: DiffEncoding,
    pub data: BandData,
    pub nodata: f64,
    /// Scaled (centimeter) min/max of the filled cells
    pub range: Option<(f64, f64)>,
}

/// Working grids of the engine: difference values (NaN = unfilled) and the
/// day gap of the pair that filled each cell (0 = unfilled)
#[derive(Debug, Clone)]
pub struct DifferenceGrid {
    pub value: Array2<f32>,
    pub day_gap: Array2<u16>,
    unfilled: usize,
}

impl DifferenceGrid {
    /// Empty grid of (rows, cols)
    pub fn new(dim: (usize, usize)) -> Self {
        Self {
            value: Array2::from_elem(dim, f32::NAN),
            day_gap: Array2::from_elem(dim, DAY_GAP_NODATA),
            unfilled: dim.0 * dim.1,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.value.dim()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn unfilled(&self) -> usize {
        self.unfilled
    }

    pub fn is_complete(&self) -> bool {
        self.unfilled == 0
    }

    /// Write `diff` and `day_gap` into cells that are still unfilled and
    /// where `diff` is finite. Returns the number of cells filled.
    pub fn fill_from(&mut self, diff: &ElevationGrid, day_gap: u16) -> DemResult<usize> {
        if diff.dim() != self.dim() {
            return Err(DemError::Processing(format!(
                "difference of shape {:?} does not match grid {:?}",
                diff.dim(),
                self.dim()
            )));
        }

        let mut filled = 0usize;
        Zip::from(&mut self.value)
            .and(&mut self.day_gap)
            .and(diff)
            .for_each(|value, gap, &d| {
                if value.is_nan() && d.is_finite() {
                    *value = d;
                    *gap = day_gap;
                    filled += 1;
                }
            });
        self.unfilled -= filled;
        Ok(filled)
    }

    pub fn encode(&self) -> EncodedDifference {
        let (encoding, range) = choose_encoding(&self.value);
        let (data, nodata) = match encoding {
            DiffEncoding::Centimeters => (
                BandData::I16(self.value.mapv(|v| {
                    if v.is_nan() {
                        CM_NODATA
                    } else {
                        (v as f64 * CM_SCALE).round() as i16
                    }
                })),
                CM_NODATA as f64,
            ),
            DiffEncoding::Float => (
                BandData::F32(self.value.mapv(|v| if v.is_nan() { FLOAT_NODATA } else { v })),
                FLOAT_NODATA as f64,
            ),
        };
        EncodedDifference {
            encoding,
            data,
            nodata,
            range,
        }
    }
}

/// `dir/stem_tail.ext`
pub fn name_with_tail(path: &Path, tail: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, tail, ext.to_string_lossy()),
        None => format!("{}_{}", stem, tail),
    };
    path.with_file_name(name)
}

/// Output locations of one difference run
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceOutputs {
    /// Float32 difference in source units
    pub difference: PathBuf,
    /// Int16 difference in centimeters (`<difference>_cm`)
    pub difference_cm: PathBuf,
    pub day_gap: PathBuf,
}

impl DifferenceOutputs {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(difference: P, day_gap: Q) -> Self {
        let difference = difference.as_ref().to_path_buf();
        Self {
            difference_cm: name_with_tail(&difference, "cm"),
            difference,
            day_gap: day_gap.as_ref().to_path_buf(),
        }
    }

    /// Where a flat-list run records its exact-day grouping
    pub fn date_manifest(&self) -> PathBuf {
        self.difference.with_file_name(DATE_MANIFEST_FILE_NAME)
    }

    fn step(&self) -> IdempotentStep {
        IdempotentStep::new(
            "DEM difference",
            vec![
                vec![self.difference.clone(), self.difference_cm.clone()],
                vec![self.day_gap.clone()],
            ],
        )
    }
}

/// Statistics of a completed difference run
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceSummary {
    pub dates: usize,
    pub pairs_total: usize,
    pub pairs_evaluated: usize,
    pub total_cells: usize,
    pub unfilled_cells: usize,
    pub encoding: DiffEncoding,
    pub difference_path: PathBuf,
    pub day_gap_path: PathBuf,
    /// Elevation arrays read from the store
    pub arrays_loaded: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DifferenceOutcome {
    /// Outputs existed; nothing was computed
    Skipped,
    Computed(DifferenceSummary),
}

/// Computes the newest-minus-oldest difference and day-gap rasters
pub struct DifferenceEngine<'a, S: RasterStore + ?Sized> {
    store: &'a S,
    observer: &'a dyn DiffObserver,
    retention: CacheRetention,
}

impl<'a, S: RasterStore + ?Sized> DifferenceEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            observer: &LogObserver,
            retention: CacheRetention::default(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn DiffObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_retention(mut self, retention: CacheRetention) -> Self {
        self.retention = retention;
        self
    }

    /// One raster per exact acquisition day; the first raster of each day wins
    pub fn dated_from_rasters(&self, rasters: &[PathBuf]) -> DemResult<BTreeMap<NaiveDate, PathBuf>> {
        Ok(first_of_each_day(exact_day_groups(rasters)?))
    }

    /// Difference a flat raster list, see [`DifferenceEngine::run`].
    ///
    /// Unless the outputs already exist, the exact-day grouping is saved as
    /// [`DATE_MANIFEST_FILE_NAME`] next to the difference output.
    pub fn run_rasters(&self, rasters: &[PathBuf], outputs: &DifferenceOutputs) -> DemResult<DifferenceOutcome> {
        let groups = exact_day_groups(rasters)?;
        if !outputs.step().is_complete(self.store) {
            let manifest = outputs.date_manifest();
            if let Some(parent) = manifest.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            save_manifest(&manifest, &groups)?;
        }
        self.run(&first_of_each_day(groups), outputs)
    }

    pub fn run(
        &self,
        dated: &BTreeMap<NaiveDate, PathBuf>,
        outputs: &DifferenceOutputs,
    ) -> DemResult<DifferenceOutcome> {
        if dated.len() < 2 {
            return Err(DemError::InsufficientData(format!(
                "DEM difference needs at least two acquisition dates, got {}",
                dated.len()
            )));
        }

        let step = outputs.step();
        if step.is_complete(self.store) {
            self.observer
                .skipped("DEM difference already exists, skipping create new ones");
            return Ok(DifferenceOutcome::Skipped);
        }

        let handles = self.describe_all(dated)?;
        let template = handles
            .values()
            .next()
            .ok_or_else(|| DemError::InsufficientData("no dated rasters".to_string()))?;
        let dim = template.dim();

        let dates: Vec<NaiveDate> = dated.keys().copied().collect();
        let pairs = enumerate_pairs(&dates)?;
        let mut grid = DifferenceGrid::new(dim);
        let mut cache = DateArrayCache::new(self.retention, &pairs);
        let mut pairs_evaluated = 0usize;

        for pair in &pairs {
            self.observer.pair_started(pair);
            for date in [pair.older, pair.newer] {
                let handle = &handles[&date];
                cache.ensure(date, || self.store.read_elevation(handle))?;
            }

            let filled = {
                let older = cache.get(pair.older)?;
                let newer = cache.get(pair.newer)?;
                if older.dim() != dim || newer.dim() != dim {
                    return Err(DemError::Processing(format!(
                        "pixel data for {} / {} does not match the declared size {:?}",
                        pair.older, pair.newer, dim
                    )));
                }
                let diff = newer - older;
                grid.fill_from(&diff, pair.day_gap)?
            };
            cache.release(pair);
            pairs_evaluated += 1;

            self.observer
                .pair_finished(pair, filled, grid.unfilled(), grid.len());
            if grid.is_complete() {
                break;
            }
        }

        let encoded = grid.encode();
        self.observer.encoding_chosen(encoded.encoding, encoded.range);
        let difference_path = match encoded.encoding {
            DiffEncoding::Centimeters => outputs.difference_cm.clone(),
            DiffEncoding::Float => outputs.difference.clone(),
        };

        step.produce(self.store, |staging| {
            self.store.write_band(
                &staging.path_for(&outputs.day_gap)?,
                &BandData::U16(grid.day_gap.clone()),
                DAY_GAP_NODATA as f64,
                template,
            )?;
            self.store.write_band(
                &staging.path_for(&difference_path)?,
                &encoded.data,
                encoded.nodata,
                template,
            )
        })?;

        Ok(DifferenceOutcome::Computed(DifferenceSummary {
            dates: dates.len(),
            pairs_total: pairs.len(),
            pairs_evaluated,
            total_cells: grid.len(),
            unfilled_cells: grid.unfilled(),
            encoding: encoded.encoding,
            difference_path,
            day_gap_path: outputs.day_gap.clone(),
            arrays_loaded: cache.loads(),
        }))
    }

    /// Open every dated raster and check that all share one size
    fn describe_all(
        &self,
        dated: &BTreeMap<NaiveDate, PathBuf>,
    ) -> DemResult<BTreeMap<NaiveDate, RasterHandle>> {
        let mut handles = BTreeMap::new();
        let mut expected: Option<(usize, usize)> = None;
        for (date, path) in dated {
            let handle = self.store.describe(path)?;
            match expected {
                None => expected = Some(handle.dim()),
                Some(dim) if dim != handle.dim() => {
                    return Err(DemError::DimensionMismatch {
                        path: path.clone(),
                        expected: dim,
                        found: handle.dim(),
                    });
                }
                Some(_) => {}
            }
            handles.insert(*date, handle);
        }
        Ok(handles)
    }
}

fn exact_day_groups(rasters: &[PathBuf]) -> DemResult<BTreeMap<NaiveDate, Vec<PathBuf>>> {
    AcquisitionGrouper::new()?.group_by_date(rasters, 0, GroupingPolicy::FirstMatch)
}

fn first_of_each_day(groups: BTreeMap<NaiveDate, Vec<PathBuf>>) -> BTreeMap<NaiveDate, PathBuf> {
    groups
        .into_iter()
        .filter_map(|(date, members)| members.into_iter().next().map(|first| (date, first)))
        .collect()
}
