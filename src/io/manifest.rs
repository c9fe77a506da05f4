use crate::types::DemResult;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Persist a grouping as a JSON object `key -> [paths]`
pub fn save_manifest<K: Display>(path: &Path, groups: &BTreeMap<K, Vec<PathBuf>>) -> DemResult<()> {
    let plain: BTreeMap<String, Vec<String>> = groups
        .iter()
        .map(|(key, members)| {
            (
                key.to_string(),
                members
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect(),
            )
        })
        .collect();

    let content = serde_json::to_string_pretty(&plain)?;
    std::fs::write(path, content)?;
    log::info!("Grouping manifest saved to: {}", path.display());
    Ok(())
}

/// Load a manifest written by [`save_manifest`]; keys are returned as written
pub fn load_manifest(path: &Path) -> DemResult<BTreeMap<String, Vec<PathBuf>>> {
    let content = std::fs::read_to_string(path)?;
    let plain: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)?;
    Ok(plain
        .into_iter()
        .map(|(key, members)| (key, members.into_iter().map(PathBuf::from).collect()))
        .collect())
}

/// One path per line, recording which rasters built a mosaic
pub fn save_source_list(path: &Path, sources: &[PathBuf]) -> DemResult<()> {
    let mut content = String::new();
    for source in sources {
        content.push_str(&source.to_string_lossy());
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(())
}
