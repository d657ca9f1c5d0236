//! Index windows for clipping a study area out of a full grid extent.

use std::ops::Range;

use ndarray::{s, Array3, ArrayView3};
use serde::Deserialize;

use crate::error::{ClimateError, Result};

/// Row order of a grid: whether latitude grows with the row index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatitudeOrder {
    #[default]
    SouthToNorth,
    NorthToSouth,
}

/// Corner coordinates of an extent: upper left is (`min_x`, `max_y`), lower
/// right is (`max_x`, `min_y`).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_y: f64,
    pub max_x: f64,
    pub min_y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipWindow {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl ClipWindow {
    /// Window of `area` inside `full`, in whole cells of `cell_x` by `cell_y`.
    /// Offsets are rounded to the nearest cell so coordinates that carry
    /// float noise still land on cell edges.
    pub fn from_bounds(
        full: &Bounds,
        area: &Bounds,
        cell_x: f64,
        cell_y: f64,
        order: LatitudeOrder,
        (nlat, nlon): (usize, usize),
    ) -> Result<Self> {
        let col_start = ((area.min_x - full.min_x) / cell_x).round();
        let col_end = (col_start + (area.max_x - area.min_x) / cell_x).round();

        let row_start = match order {
            LatitudeOrder::SouthToNorth => ((area.min_y - full.min_y) / cell_y).round(),
            LatitudeOrder::NorthToSouth => ((full.max_y - area.max_y) / cell_y).round(),
        };
        let row_end = (row_start + (area.max_y - area.min_y) / cell_y).round();

        let (row_start, row_end) = (row_start as i64, row_end as i64);
        let (col_start, col_end) = (col_start as i64, col_end as i64);

        let fits = |start: i64, end: i64, len: usize| start >= 0 && start < end && end <= len as i64;
        if !fits(row_start, row_end, nlat) || !fits(col_start, col_end, nlon) {
            return Err(ClimateError::ClipOutOfBounds {
                rows: (row_start, row_end),
                cols: (col_start, col_end),
                nlat,
                nlon,
            });
        }

        Ok(ClipWindow {
            rows: row_start as usize..row_end as usize,
            cols: col_start as usize..col_end as usize,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    pub fn apply(&self, values: ArrayView3<f32>) -> Array3<f32> {
        values
            .slice(s![.., self.rows.clone(), self.cols.clone()])
            .to_owned()
    }

    pub fn apply_coords(&self, lat: &[f64], lon: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (lat[self.rows.clone()].to_vec(), lon[self.cols.clone()].to_vec())
    }
}

// -- Tests -------------------------------------------------------------------
