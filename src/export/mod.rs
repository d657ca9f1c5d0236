//! Output products: GeoTIFF rasters and a _parquet_ summary table.

pub mod parquet;
pub mod raster;

pub use self::parquet::{save_summary, GridRecord};
pub use raster::{read_raster, write_raster, GeoTransform};
