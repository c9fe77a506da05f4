use crate::core::difference::CacheRetention;
use crate::core::grouping::GroupingPolicy;
use crate::core::mosaic::ResampleMethod;
use crate::types::{DemError, DemResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parameters of a pipeline run over one extent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory receiving mosaics, reports and outputs
    pub work_dir: PathBuf,
    /// Output resolution in projection units
    pub out_res: f64,
    /// Keep rasters with at least this valid percentage; `None` keeps all
    pub keep_percent: Option<f64>,
    /// Window for merging acquisitions into one date
    pub date_group_days: i64,
    pub resample: ResampleMethod,
    /// Mosaic rasters sharing a strip-pair ID
    pub mosaic_by_strip: bool,
    /// Mosaic rasters with close acquisition dates
    pub mosaic_by_date: bool,
    pub make_difference: bool,
    /// Remove the mosaic directories after the difference is written
    pub remove_intermediate: bool,
    pub grouping_policy: GroupingPolicy,
    pub cache_retention: CacheRetention,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            out_res: 2.0,              // ArcticDEM strip resolution
            keep_percent: Some(30.0),
            date_group_days: 31,       // roughly one month
            resample: ResampleMethod::Average,
            mosaic_by_strip: true,
            mosaic_by_date: true,
            make_difference: true,
            remove_intermediate: false,
            grouping_policy: GroupingPolicy::FirstMatch,
            cache_retention: CacheRetention::EvictWhenDone,
        }
    }
}

impl PipelineConfig {
    /// Load from JSON; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> DemResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded pipeline configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> DemResult<()> {
        if !(self.out_res > 0.0) {
            return Err(DemError::InvalidFormat(format!(
                "out_res must be positive, got {}",
                self.out_res
            )));
        }
        if let Some(p) = self.keep_percent {
            if !(0.0..=100.0).contains(&p) {
                return Err(DemError::InvalidFormat(format!(
                    "keep_percent must be within 0-100, got {}",
                    p
                )));
            }
        }
        if self.date_group_days < 0 {
            return Err(DemError::InvalidFormat(format!(
                "date_group_days must not be negative, got {}",
                self.date_group_days
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "out_res": 8.0, "grouping_policy": "chronological", "keep_percent": null }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.out_res, 8.0);
        assert_eq!(config.grouping_policy, GroupingPolicy::Chronological);
        assert_eq!(config.keep_percent, None);
        assert_eq!(config.date_group_days, 31);
        assert_eq!(config.resample, ResampleMethod::Average);
    }

    #[test]
    fn test_validation() {
        assert!(PipelineConfig::default().validate().is_ok());

        let bad_res = PipelineConfig { out_res: 0.0, ..Default::default() };
        assert!(bad_res.validate().is_err());

        let bad_percent = PipelineConfig { keep_percent: Some(130.0), ..Default::default() };
        assert!(bad_percent.validate().is_err());
    }
}
