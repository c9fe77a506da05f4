//! End-to-end processing of one extent: strip mosaics, validity culling,
//! date mosaics and the newest-minus-oldest difference.

use crate::config::PipelineConfig;
use crate::core::difference::{DifferenceEngine, DifferenceOutcome, DifferenceOutputs};
use crate::core::grouping::{AcquisitionGrouper, AcquisitionKey};
use crate::core::idempotent::{IdempotentStep, StepOutcome};
use crate::core::mosaic::{mosaic_groups, MosaicCompositor, MosaicOptions};
use crate::core::observer::{DiffObserver, LogObserver};
use crate::core::validity::{ValidityFilter, ValidityReport, REPORT_FILE_NAME};
use crate::io::{save_manifest, RasterStore};
use crate::types::{BoundingBox, DemError, DemResult};
use std::path::{Path, PathBuf};

/// Name of the date grouping manifest written into the strip mosaic directory
pub const DATE_MANIFEST_FILE_NAME: &str = "year_date_tif.txt";

/// One processing extent
#[derive(Debug, Clone, PartialEq)]
pub struct ExtentJob {
    /// Numeric extent ID, used in every output name
    pub id: u32,
    /// Rasters whose footprint does not intersect the extent are ignored;
    /// `None` uses every raster
    pub extent: Option<BoundingBox>,
    /// Prefix of the final output names
    pub prefix: String,
}

impl ExtentJob {
    pub fn strip_mosaic_dir(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("dem_stripID_mosaic_sub_{}", self.id))
    }

    pub fn date_mosaic_dir(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("dem_date_mosaic_sub_{}", self.id))
    }

    pub fn difference_outputs(&self, work_dir: &Path) -> DifferenceOutputs {
        DifferenceOutputs::new(
            work_dir.join(format!("{}_ArcticDEM_diff_sub_{}.tif", self.prefix, self.id)),
            work_dir.join(format!("{}_date_diff_sub_{}.tif", self.prefix, self.id)),
        )
    }

    pub fn tile_mosaic_path(&self, work_dir: &Path, tile: &str) -> PathBuf {
        work_dir.join(format!(
            "{}_{}_ArcticTileDEM_sub_{}.tif",
            self.prefix, tile, self.id
        ))
    }
}

/// What a pipeline run produced
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Mosaic-tile inputs, merged into one raster
    Tile { mosaic: PathBuf, reused: bool },
    /// Strip inputs, processed through the temporal stages
    Strip {
        /// Rasters surviving the strip stage
        strip_rasters: Vec<PathBuf>,
        /// Rasters surviving the date stage, one per acquisition date
        date_rasters: Vec<PathBuf>,
        difference: Option<DifferenceOutcome>,
    },
}

/// Runs the strip or tile workflow for one extent
pub struct StripPipeline<'a, S, C>
where
    S: RasterStore + ?Sized,
    C: MosaicCompositor + ?Sized,
{
    store: &'a S,
    compositor: &'a C,
    config: &'a PipelineConfig,
    observer: &'a dyn DiffObserver,
    grouper: AcquisitionGrouper,
}

impl<'a, S, C> StripPipeline<'a, S, C>
where
    S: RasterStore + ?Sized,
    C: MosaicCompositor + ?Sized,
{
    pub fn new(store: &'a S, compositor: &'a C, config: &'a PipelineConfig) -> DemResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            compositor,
            config,
            observer: &LogObserver,
            grouper: AcquisitionGrouper::new()?,
        })
    }

    pub fn with_observer(mut self, observer: &'a dyn DiffObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Rasters whose footprint intersects `extent`, in input order.
    /// Rasters that cannot be opened are skipped with a warning.
    pub fn select_by_extent(&self, rasters: &[PathBuf], extent: Option<&BoundingBox>) -> Vec<PathBuf> {
        let Some(extent) = extent else {
            return rasters.to_vec();
        };
        let mut selected = Vec::new();
        for raster in rasters {
            match self.store.describe(raster) {
                Ok(handle) if handle.footprint().intersects(extent) => selected.push(raster.clone()),
                Ok(_) => log::debug!("{} is outside the extent", raster.display()),
                Err(e) => log::warn!("warning, skip {}: {}", raster.display(), e),
            }
        }
        selected
    }

    pub fn run(&self, job: &ExtentJob, rasters: &[PathBuf]) -> DemResult<PipelineOutcome> {
        let work_dir = &self.config.work_dir;
        std::fs::create_dir_all(work_dir)?;

        let selected = self.select_by_extent(rasters, job.extent.as_ref());
        if selected.is_empty() {
            return Err(DemError::NoInputs(format!(
                "no raster intersects extent {} ({} candidates)",
                job.id,
                rasters.len()
            )));
        }
        log::info!("Extent {}: {} of {} rasters selected", job.id, selected.len(), rasters.len());

        if self.grouper.parser().all_tiles(&selected) {
            return self.run_tiles(job, &selected);
        }
        self.run_strips(job, &selected)
    }

    fn run_tiles(&self, job: &ExtentJob, tiles: &[PathBuf]) -> DemResult<PipelineOutcome> {
        let tile = tiles
            .first()
            .and_then(|t| self.grouper.parser().tile_id(t))
            .ok_or_else(|| DemError::NoInputs("no mosaic tiles".to_string()))?;
        let mosaic = job.tile_mosaic_path(&self.config.work_dir, &tile);
        let options = self.mosaic_options(job);

        let step = IdempotentStep::single(format!("tile mosaic {}", tile), mosaic.clone());
        let outcome = step.run(self.store, |staging| {
            self.compositor
                .composite(tiles, &staging.path_for(&mosaic)?, &options)
        })?;
        Ok(PipelineOutcome::Tile {
            mosaic,
            reused: outcome == StepOutcome::Skipped,
        })
    }

    fn run_strips(&self, job: &ExtentJob, selected: &[PathBuf]) -> DemResult<PipelineOutcome> {
        let config = self.config;
        let work_dir = &config.work_dir;
        let expected_pixels = job.extent.map(|e| e.pixel_count(config.out_res));
        if let Some(count) = expected_pixels {
            log::info!("Area pixel count: {}", count);
        }
        let filter = ValidityFilter::new(config.keep_percent, expected_pixels);
        let options = self.mosaic_options(job);

        let strip_dir = job.strip_mosaic_dir(work_dir);
        std::fs::create_dir_all(&strip_dir)?;
        let strip_rasters = if config.mosaic_by_strip {
            self.stage(&strip_dir, &filter, || {
                let groups: Vec<(AcquisitionKey, Vec<PathBuf>)> = self
                    .grouper
                    .group_by_strip_id(selected)?
                    .into_iter()
                    .map(|(id, members)| (AcquisitionKey::Strip(id), members))
                    .collect();
                mosaic_groups(self.store, self.compositor, &groups, &strip_dir, &options, false)
            })?
        } else {
            selected.to_vec()
        };
        if strip_rasters.is_empty() {
            return Err(DemError::NoInputs(format!(
                "no strip raster of extent {} passed the validity check",
                job.id
            )));
        }

        let date_groups = self.grouper.group_by_date(
            &strip_rasters,
            config.date_group_days,
            config.grouping_policy,
        )?;
        save_manifest(&strip_dir.join(DATE_MANIFEST_FILE_NAME), &date_groups)?;

        let date_dir = job.date_mosaic_dir(work_dir);
        let date_rasters = if config.mosaic_by_date {
            std::fs::create_dir_all(&date_dir)?;
            self.stage(&date_dir, &filter, || {
                let groups: Vec<(AcquisitionKey, Vec<PathBuf>)> = date_groups
                    .iter()
                    .map(|(date, members)| (AcquisitionKey::Date(*date), members.clone()))
                    .collect();
                mosaic_groups(self.store, self.compositor, &groups, &date_dir, &options, true)
            })?
        } else {
            strip_rasters.clone()
        };

        let difference = if config.make_difference {
            let engine = DifferenceEngine::new(self.store)
                .with_observer(self.observer)
                .with_retention(config.cache_retention);
            Some(engine.run_rasters(&date_rasters, &job.difference_outputs(work_dir))?)
        } else {
            None
        };

        if config.remove_intermediate && difference.is_some() {
            log::info!("remove intermediate files");
            for dir in [&strip_dir, &date_dir] {
                if dir.is_dir() {
                    std::fs::remove_dir_all(dir)?;
                }
            }
        }

        Ok(PipelineOutcome::Strip {
            strip_rasters,
            date_rasters,
            difference,
        })
    }

    /// Mosaic stage with resume: if `dir` already holds a validity report the
    /// stage is considered done and its kept rasters are reloaded from it.
    fn stage<F>(&self, dir: &Path, filter: &ValidityFilter, mosaic: F) -> DemResult<Vec<PathBuf>>
    where
        F: FnOnce() -> DemResult<Vec<PathBuf>>,
    {
        if dir.join(REPORT_FILE_NAME).is_file() {
            log::warn!("mosaics in {} exist, skip mosaicking", dir.display());
            return Ok(ValidityReport::load(dir)?.kept(filter.keep_threshold));
        }
        let mosaics = mosaic()?;
        filter.apply(self.store, &mosaics, dir)
    }

    /// Every mosaic of a job lands on the job's extent so the date mosaics
    /// share one grid
    fn mosaic_options(&self, job: &ExtentJob) -> MosaicOptions {
        MosaicOptions {
            resample: self.config.resample,
            pixel_size: Some(self.config.out_res),
            extent: job.extent,
        }
    }
}
