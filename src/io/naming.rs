//! Acquisition identity encoded in DEM file names.
//!
//! Strip products carry the capture date and the two catalog IDs of the
//! stereo pair, e.g. `SETSM_WV02_20170226_1030010066648800_1030010066CDE700_seg1_2m_dem.tif`.
//! Mosaic tiles start with a `row_col_` prefix, e.g. `41_17_2_1_2m_v3.0_reg_dem.tif`.

use crate::types::{base_name, DemError, DemResult};
use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;

const STRIP_ID_PATTERN: &str = r"[0-9]{8}_[0-9A-F]{16}_[0-9A-F]{16}";
const TILE_PATTERN: &str = r"^\d{2}_\d{2}_";
const DIGIT_RUN_PATTERN: &str = r"\d+";

/// Compiled file-name patterns
#[derive(Debug, Clone)]
pub struct FileNameParser {
    strip_id: Regex,
    tile: Regex,
    digit_run: Regex,
}

impl FileNameParser {
    pub fn new() -> DemResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| DemError::Processing(format!("Invalid pattern {}: {}", pattern, e)))
        };
        Ok(Self {
            strip_id: compile(STRIP_ID_PATTERN)?,
            tile: compile(TILE_PATTERN)?,
            digit_run: compile(DIGIT_RUN_PATTERN)?,
        })
    }

    /// Strip-pair ID such as `20170226_1030010066648800_1030010066CDE700`.
    /// The name must contain exactly one.
    pub fn strip_pair_id(&self, path: &Path) -> DemResult<String> {
        let name = base_name(path);
        let matches: Vec<&str> = self.strip_id.find_iter(&name).map(|m| m.as_str()).collect();
        match matches.as_slice() {
            [id] => Ok((*id).to_string()),
            _ => {
                log::error!("Strip IDs found in {}: {:?}", name, matches);
                Err(DemError::AmbiguousStripId {
                    path: path.to_path_buf(),
                    count: matches.len(),
                })
            }
        }
    }

    /// First standalone 8-digit run in the file name that is a valid `YYYYMMDD` date.
    /// Digits inside longer runs (catalog IDs) are never considered.
    pub fn acquisition_date(&self, path: &Path) -> DemResult<NaiveDate> {
        let name = base_name(path);
        self.digit_run
            .find_iter(&name)
            .filter(|m| m.as_str().len() == 8)
            .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y%m%d").ok())
            .ok_or_else(|| {
                DemError::InvalidFormat(format!("No acquisition date (YYYYMMDD) in {}", name))
            })
    }

    /// Whether the file name carries the mosaic-tile prefix
    pub fn is_tile(&self, path: &Path) -> bool {
        self.tile.is_match(&base_name(path))
    }

    /// Tile `row_col` prefix without the trailing underscore
    pub fn tile_id(&self, path: &Path) -> Option<String> {
        let name = base_name(path);
        self.tile
            .find(&name)
            .map(|m| m.as_str().trim_end_matches('_').to_string())
    }

    /// True only for a non-empty list where every name is a mosaic tile
    pub fn all_tiles<P: AsRef<Path>>(&self, paths: &[P]) -> bool {
        if paths.is_empty() {
            return false;
        }
        for path in paths {
            if !self.is_tile(path.as_ref()) {
                log::info!("{} is not a mosaic tile", path.as_ref().display());
                return false;
            }
        }
        true
    }
}
