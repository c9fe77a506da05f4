use crate::io::naming::FileNameParser;
use crate::types::DemResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// How rasters are visited during date-proximity grouping.
///
/// Grouping is single-pass: a raster joins the first open group whose
/// representative date lies within the window, so the visiting order decides
/// which date ends up representing a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// Visit rasters in the order given
    #[default]
    FirstMatch,
    /// Visit rasters sorted by (date, file name); independent of input order
    Chronological,
}

/// Identity of one acquisition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AcquisitionKey {
    /// Strip-pair ID, matched exactly
    Strip(String),
    /// Calendar date at day resolution
    Date(NaiveDate),
}

impl AcquisitionKey {
    /// File name of the mosaic built for this acquisition
    pub fn mosaic_file_name(&self) -> String {
        format!("{}.tif", self.stem())
    }

    /// File name of the list of rasters a mosaic was built from
    pub fn source_list_name(&self) -> String {
        format!("{}_src.txt", self.stem())
    }

    fn stem(&self) -> String {
        match self {
            AcquisitionKey::Strip(id) => id.clone(),
            AcquisitionKey::Date(date) => format!("{}_dem", date.format("%Y%m%d")),
        }
    }
}

impl fmt::Display for AcquisitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionKey::Strip(id) => write!(f, "{}", id),
            AcquisitionKey::Date(date) => write!(f, "{}", date.format("%Y%m%d")),
        }
    }
}

/// Groups raster files by acquisition identity
pub struct AcquisitionGrouper {
    parser: FileNameParser,
}

impl AcquisitionGrouper {
    pub fn new() -> DemResult<Self> {
        Ok(Self {
            parser: FileNameParser::new()?,
        })
    }

    pub fn parser(&self) -> &FileNameParser {
        &self.parser
    }

    /// Group by the strip-pair ID in each file name. Fails if any name
    /// carries zero or several IDs.
    pub fn group_by_strip_id(&self, rasters: &[PathBuf]) -> DemResult<BTreeMap<String, Vec<PathBuf>>> {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for raster in rasters {
            let strip_id = self.parser.strip_pair_id(raster)?;
            groups.entry(strip_id).or_default().push(raster.clone());
        }
        log::info!("Grouped {} rasters into {} strips", rasters.len(), groups.len());
        Ok(groups)
    }

    /// Group by acquisition date: each raster joins the first open group whose
    /// key date is within `max_gap_days` (inclusive) of its own date, else it
    /// opens a new group keyed by its date.
    pub fn group_by_date(
        &self,
        rasters: &[PathBuf],
        max_gap_days: i64,
        policy: GroupingPolicy,
    ) -> DemResult<BTreeMap<NaiveDate, Vec<PathBuf>>> {
        let mut dated = Vec::with_capacity(rasters.len());
        for raster in rasters {
            dated.push((self.parser.acquisition_date(raster)?, raster.clone()));
        }
        if policy == GroupingPolicy::Chronological {
            dated.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        }

        // Open groups in creation order
        let mut open: Vec<(NaiveDate, Vec<PathBuf>)> = Vec::new();
        for (date, raster) in dated {
            match open
                .iter_mut()
                .find(|(key, _)| (date - *key).num_days().abs() <= max_gap_days)
            {
                Some((_, members)) => members.push(raster),
                None => open.push((date, vec![raster])),
            }
        }

        log::info!(
            "Grouped {} rasters into {} acquisition dates (window {} days, {:?})",
            rasters.len(),
            open.len(),
            max_gap_days,
            policy
        );
        Ok(open.into_iter().collect())
    }
}
