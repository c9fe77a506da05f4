//! I/O modules for rasters, file-name metadata and run manifests

pub mod store;
pub mod memory;
#[cfg(feature = "gdal")]
pub mod gdal_store;
pub mod naming;
pub mod manifest;

pub use store::RasterStore;
pub use memory::MemoryStore;
#[cfg(feature = "gdal")]
pub use gdal_store::GdalStore;
pub use naming::FileNameParser;
pub use manifest::{load_manifest, save_manifest, save_source_list};
