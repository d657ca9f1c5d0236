//! Loading a source chunk and bringing it onto the compiled grid.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::{
    error::Result,
    grid::{apply_unit_transform, AxisOrder, Bounds, ClipWindow, LatitudeOrder, UnitTransform},
    store::{read_series, TimeSeries},
};

/// Study-area window, given as the full extent of the source grid and the
/// area to keep.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClipRegion {
    pub full: Bounds,
    pub area: Bounds,
    pub cell_x: f64,
    pub cell_y: f64,
    #[serde(default)]
    pub latitude_order: LatitudeOrder,
}

impl ClipRegion {
    pub fn window(&self, grid_shape: (usize, usize)) -> Result<ClipWindow> {
        ClipWindow::from_bounds(
            &self.full,
            &self.area,
            self.cell_x,
            self.cell_y,
            self.latitude_order,
            grid_shape,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceOptions {
    /// Variable name inside the source chunks.
    pub variable: String,
    #[serde(default)]
    pub axis_order: AxisOrder,
    #[serde(default)]
    pub clip: Option<ClipRegion>,
    /// Added to every longitude, e.g. `-360` for grids stored as 0..360.
    #[serde(default)]
    pub lon_offset: f64,
    #[serde(default)]
    pub transform: UnitTransform,
}

impl SourceOptions {
    #[cfg(test)]
    pub fn new(variable: impl Into<String>) -> Self {
        SourceOptions {
            variable: variable.into(),
            axis_order: AxisOrder::default(),
            clip: None,
            lon_offset: 0.0,
            transform: UnitTransform::default(),
        }
    }
}

/// Reads the chunk at `path` and clips, shifts and transforms it.
pub fn load_chunk(path: &Path, options: &SourceOptions) -> Result<TimeSeries> {
    let series = read_series(path, &options.variable, options.axis_order)?;
    prepare_chunk(series, options)
}

pub fn prepare_chunk(series: TimeSeries, options: &SourceOptions) -> Result<TimeSeries> {
    let TimeSeries {
        variable,
        encoding,
        times,
        lat,
        lon,
        values,
    } = series;

    let (values, lat, mut lon) = match &options.clip {
        Some(clip) => {
            let window = clip.window((lat.len(), lon.len()))?;
            debug!(rows = ?window.rows, cols = ?window.cols, "clipping chunk");
            let (lat, lon) = window.apply_coords(&lat, &lon);
            (window.apply(values.view()), lat, lon)
        }
        None => (values, lat, lon),
    };

    if options.lon_offset != 0.0 {
        lon.iter_mut().for_each(|x| *x += options.lon_offset);
    }
    let dates = encoding.decode_all(&times)?;
    let values = apply_unit_transform(values, &options.transform, &dates)?;

    TimeSeries::new(variable, encoding, times, lat, lon, values)
}

// -- Tests -------------------------------------------------------------------
