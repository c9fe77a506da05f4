use demchange::core::pipeline::DATE_MANIFEST_FILE_NAME;
use demchange::core::{AlignedCompositor, DifferenceOutcome, ExtentJob, PipelineOutcome, StripPipeline};
use demchange::io::load_manifest;
use demchange::{BandData, BoundingBox, DemError, GeoTransform, MemoryStore, PipelineConfig, RasterStore};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const S1: &str = "20170715_1020010063A3B400_102001006212F600";
const S2: &str = "20170720_10300100696B2B00_1030010069A3E900";
const S3: &str = "20190715_104001004D4D8D00_104001004E1A3C00";
const S4: &str = "20180715_1020010074A0F900_10200100766A2200";

fn strip_name(strip: &str, seg: u32) -> String {
    format!("SETSM_WV01_{}_seg{}_2m_dem.tif", strip, seg)
}

fn add(store: &MemoryStore, dir: &Path, name: &str, grid: Array2<f32>, x: f64) -> PathBuf {
    let path = dir.join(name);
    store.insert_elevation(&path, grid, GeoTransform::north_up(x, 20.0, 2.0), None);
    path
}

/// Strip rasters over a 20 x 20 m extent at 2 m:
/// - S1 (2017-07-15) in two segments covering the left and right halves
/// - S2 (2017-07-20) full coverage, merged with S1 by date
/// - S4 (2018-07-15) only 10% valid, culled
/// - S3 (2019-07-15) full coverage
/// - one more strip far outside the extent
fn strip_inputs(store: &MemoryStore, dir: &Path) -> Vec<PathBuf> {
    let mut sparse = Array2::from_elem((10, 10), f32::NAN);
    sparse.row_mut(0).fill(50.0);

    vec![
        add(store, dir, &strip_name(S1, 1), Array2::from_elem((10, 5), 100.0), 0.0),
        add(store, dir, &strip_name(S1, 2), Array2::from_elem((10, 5), 100.0), 10.0),
        add(store, dir, &strip_name(S2, 1), Array2::from_elem((10, 10), 100.5), 0.0),
        add(store, dir, &strip_name(S4, 1), sparse, 0.0),
        add(store, dir, &strip_name(S3, 1), Array2::from_elem((10, 10), 102.0), 0.0),
        add(
            store,
            dir,
            "SETSM_WV02_20180801_103001007A1B2C00_103001007D4E5F00_seg1_2m_dem.tif",
            Array2::from_elem((10, 10), 1.0),
            10000.0,
        ),
    ]
}

fn job() -> ExtentJob {
    ExtentJob {
        id: 1,
        extent: Some(BoundingBox::new(0.0, 0.0, 20.0, 20.0)),
        prefix: "WR".to_string(),
    }
}

fn config(work_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.to_path_buf(),
        ..Default::default()
    }
}

#[test]
fn test_strip_pipeline_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();
    let input = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let rasters = strip_inputs(&store, input.path());
    let config = config(work.path());
    let compositor = AlignedCompositor::new(&store);
    let job = job();

    let pipeline = StripPipeline::new(&store, &compositor, &config).unwrap();
    let outcome = pipeline.run(&job, &rasters).unwrap();

    let PipelineOutcome::Strip {
        strip_rasters,
        date_rasters,
        difference,
    } = outcome
    else {
        panic!("expected the strip workflow");
    };

    let strip_dir = job.strip_mosaic_dir(work.path());
    assert_eq!(
        strip_rasters,
        vec![
            strip_dir.join(format!("{}.tif", S1)),
            strip_dir.join(format!("{}.tif", S2)),
            strip_dir.join(format!("{}.tif", S3)),
        ]
    );
    assert!(store.exists(&strip_dir.join("dem_valid_lt_30.00").join(format!("{}.tif", S4))));

    let manifest = load_manifest(&strip_dir.join(DATE_MANIFEST_FILE_NAME)).unwrap();
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest["2017-07-15"].len(), 2);

    let date_dir = job.date_mosaic_dir(work.path());
    assert_eq!(
        date_rasters,
        vec![date_dir.join("20170715_dem.tif"), date_dir.join("20190715_dem.tif")]
    );
    assert!(date_dir.join("20170715_dem_src.txt").is_file());

    let Some(DifferenceOutcome::Computed(summary)) = difference else {
        panic!("expected a computed difference");
    };
    assert_eq!(summary.unfilled_cells, 0);
    let outputs = job.difference_outputs(work.path());
    assert_eq!(summary.difference_path, outputs.difference_cm);

    // 2019 minus the average of the two July 2017 strips
    let (diff, _) = store.band(&outputs.difference_cm).unwrap();
    assert_eq!(diff, BandData::I16(Array2::from_elem((10, 10), 175)));
    let (gap, _) = store.band(&outputs.day_gap).unwrap();
    assert_eq!(gap, BandData::U16(Array2::from_elem((10, 10), 730)));
}

#[test]
fn test_rerun_reuses_stage_reports() {
    let input = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let rasters = strip_inputs(&store, input.path());
    let config = config(work.path());
    let compositor = AlignedCompositor::new(&store);
    let job = job();
    let pipeline = StripPipeline::new(&store, &compositor, &config).unwrap();

    let first = pipeline.run(&job, &rasters).unwrap();
    let stored = store.len();
    let second = pipeline.run(&job, &rasters).unwrap();

    let (
        PipelineOutcome::Strip {
            strip_rasters: strips_a,
            date_rasters: dates_a,
            ..
        },
        PipelineOutcome::Strip {
            strip_rasters: strips_b,
            date_rasters: dates_b,
            difference,
        },
    ) = (first, second)
    else {
        panic!("expected the strip workflow twice");
    };
    assert_eq!(strips_a, strips_b);
    assert_eq!(dates_a, dates_b);
    assert_eq!(difference, Some(DifferenceOutcome::Skipped));
    assert_eq!(store.len(), stored);
}

#[test]
fn test_remove_intermediate_directories() {
    let input = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let rasters = strip_inputs(&store, input.path());
    let config = PipelineConfig {
        remove_intermediate: true,
        ..config(work.path())
    };
    let compositor = AlignedCompositor::new(&store);
    let job = job();

    StripPipeline::new(&store, &compositor, &config)
        .unwrap()
        .run(&job, &rasters)
        .unwrap();

    assert!(!job.strip_mosaic_dir(work.path()).exists());
    assert!(!job.date_mosaic_dir(work.path()).exists());
    assert!(store.exists(&job.difference_outputs(work.path()).day_gap));
}

#[test]
fn test_tiles_are_mosaicked_into_one_raster() {
    let input = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let tiles = vec![
        add(&store, input.path(), "41_17_1_1_2m_v3.0_reg_dem.tif", Array2::from_elem((10, 5), 7.0), 0.0),
        add(&store, input.path(), "41_17_1_2_2m_v3.0_reg_dem.tif", Array2::from_elem((10, 5), 9.0), 10.0),
    ];
    let config = config(work.path());
    let compositor = AlignedCompositor::new(&store);
    let job = job();
    let pipeline = StripPipeline::new(&store, &compositor, &config).unwrap();

    let outcome = pipeline.run(&job, &tiles).unwrap();
    let expected = work.path().join("WR_41_17_ArcticTileDEM_sub_1.tif");
    assert_eq!(
        outcome,
        PipelineOutcome::Tile {
            mosaic: expected.clone(),
            reused: false
        }
    );
    let handle = store.describe(&expected).unwrap();
    assert_eq!(handle.dim(), (10, 10));

    let again = pipeline.run(&job, &tiles).unwrap();
    assert_eq!(
        again,
        PipelineOutcome::Tile {
            mosaic: expected,
            reused: true
        }
    );
}

#[test]
fn test_extent_without_rasters_is_fatal() {
    let input = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let rasters = strip_inputs(&store, input.path());
    let config = config(work.path());
    let compositor = AlignedCompositor::new(&store);
    let job = ExtentJob {
        extent: Some(BoundingBox::new(-500.0, -500.0, -400.0, -400.0)),
        ..job()
    };

    let result = StripPipeline::new(&store, &compositor, &config)
        .unwrap()
        .run(&job, &rasters);
    assert!(matches!(result, Err(DemError::NoInputs(_))));
}

#[test]
fn test_unreadable_rasters_are_skipped_during_selection() {
    let input = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let mut rasters = strip_inputs(&store, input.path());
    rasters.push(input.path().join("not_registered.tif"));
    let config = config(work.path());
    let compositor = AlignedCompositor::new(&store);
    let pipeline = StripPipeline::new(&store, &compositor, &config).unwrap();

    let extent = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
    let selected = pipeline.select_by_extent(&rasters, Some(&extent));
    assert_eq!(selected, rasters[..5].to_vec());
}

#[test]
fn test_partial_date_coverage_is_padded_to_the_extent() {
    let input = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let store = MemoryStore::new();
    // the 2019 strip only covers the left half of the extent
    let rasters = vec![
        add(&store, input.path(), &strip_name(S1, 1), Array2::from_elem((10, 10), 100.0), 0.0),
        add(&store, input.path(), &strip_name(S3, 1), Array2::from_elem((10, 5), 102.0), 0.0),
    ];
    let config = config(work.path());
    let compositor = AlignedCompositor::new(&store);
    let job = job();

    let outcome = StripPipeline::new(&store, &compositor, &config)
        .unwrap()
        .run(&job, &rasters)
        .unwrap();
    let PipelineOutcome::Strip {
        date_rasters,
        difference,
        ..
    } = outcome
    else {
        panic!("expected the strip workflow");
    };

    assert_eq!(date_rasters.len(), 2);
    for raster in &date_rasters {
        assert_eq!(store.describe(raster).unwrap().dim(), (10, 10));
    }

    let Some(DifferenceOutcome::Computed(summary)) = difference else {
        panic!("expected a computed difference");
    };
    assert_eq!(summary.unfilled_cells, 50);

    let outputs = job.difference_outputs(work.path());
    let mut expected = Array2::from_elem((10, 10), i16::MAX);
    expected.slice_mut(ndarray::s![.., ..5]).fill(200);
    let (diff, _) = store.band(&outputs.difference_cm).unwrap();
    assert_eq!(diff, BandData::I16(expected));
}
