//! Error types shared by the season, grid, store and compile modules.

use chrono::NaiveDateTime;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClimateError>;

#[derive(Debug, Error)]
pub enum ClimateError {
    #[error("invalid month {0}: expected a value between 1 and 12")]
    InvalidMonth(u32),

    /// A water-year shifted timestamp has no exact counterpart in the series' time axis.
    /// Expected at the edges of a series, e.g. December of the first year.
    #[error("water-year time value {value} ({date}) has no exact match in the time axis")]
    ValueExactMatchNotFound { date: NaiveDateTime, value: f64 },

    #[error("grid shape mismatch: expected {expected:?} (lat, lon), found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("{axis} coordinate {index} is {found}, the store has {expected}")]
    CoordinateMismatch {
        axis: &'static str,
        index: usize,
        expected: f64,
        found: f64,
    },

    #[error("chunk has {times} time values for {steps} grids")]
    TimeLengthMismatch { times: usize, steps: usize },

    #[error("incompatible time coordinates: `{left}` vs `{right}`")]
    IncompatibleTime { left: String, right: String },

    #[error("time values must be strictly increasing: {previous} is followed by {next}")]
    NonMonotonicTime { previous: f64, next: f64 },

    #[error("invalid time units `{0}`")]
    InvalidTimeUnits(String),

    #[error("unsupported calendar `{0}`: only gregorian calendars are handled")]
    UnsupportedCalendar(String),

    #[error("date out of range: {0}")]
    DateOutOfRange(String),

    #[error("time index {index} is outside a series of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("clip window rows {rows:?}, cols {cols:?} falls outside a {nlat}x{nlon} grid")]
    ClipOutOfBounds {
        rows: (i64, i64),
        cols: (i64, i64),
        nlat: usize,
        nlon: usize,
    },

    #[error("variable `{0}` not found")]
    MissingVariable(String),

    #[error("unsupported store format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed store: {0}")]
    MalformedStore(String),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "netcdf")]
    #[error(transparent)]
    NetCdf(#[from] netcdf::Error),
}
