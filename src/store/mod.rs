//! Time series held in memory and the on-disk stores they are compiled into.

pub mod arrow;
#[cfg(feature = "netcdf")]
pub mod netcdf;

use std::path::Path;

use chrono::{Local, NaiveDateTime};
use ndarray::{concatenate, Array3, ArrayView3, Axis, Zip};
use serde::Deserialize;

use crate::{
    error::{ClimateError, Result},
    grid::{ensure_same_shape, AxisOrder},
    time_coord::TimeEncoding,
};

pub use self::arrow::ArrowStore;
#[cfg(feature = "netcdf")]
pub use self::netcdf::NetcdfStore;

/// A gridded series on a fixed (lat, lon) grid, values indexed [time, lat, lon].
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub variable: String,
    pub encoding: TimeEncoding,
    pub times: Vec<f64>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub values: Array3<f32>,
}

impl TimeSeries {
    pub fn new(
        variable: impl Into<String>,
        encoding: TimeEncoding,
        times: Vec<f64>,
        lat: Vec<f64>,
        lon: Vec<f64>,
        values: Array3<f32>,
    ) -> Result<Self> {
        let (steps, nlat, nlon) = values.dim();
        if steps != times.len() {
            return Err(ClimateError::TimeLengthMismatch {
                times: times.len(),
                steps,
            });
        }
        ensure_same_shape((lat.len(), lon.len()), (nlat, nlon))?;
        ensure_increasing(&times)?;

        Ok(TimeSeries {
            variable: variable.into(),
            encoding,
            times,
            lat,
            lon,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }

    pub fn dates(&self) -> Result<Vec<NaiveDateTime>> {
        self.encoding.decode_all(&self.times)
    }

    /// Joins series end to end, as a multi-file dataset would present them.
    pub fn concat(parts: Vec<TimeSeries>) -> Result<TimeSeries> {
        let mut parts = parts.into_iter();
        let first = parts
            .next()
            .ok_or(ClimateError::InvalidState("no series to concatenate"))?;

        let mut times = first.times.clone();
        let mut views = Vec::new();
        let rest: Vec<TimeSeries> = parts.collect();

        for part in &rest {
            first.encoding.ensure_compatible(&part.encoding)?;
            ensure_same_shape(first.grid_shape(), part.grid_shape())?;
            if let (Some(&previous), Some(&next)) = (times.last(), part.times.first()) {
                if next <= previous {
                    return Err(ClimateError::NonMonotonicTime { previous, next });
                }
            }
            times.extend_from_slice(&part.times);
        }

        views.push(first.values.view());
        views.extend(rest.iter().map(|part| part.values.view()));
        let values = concatenate(Axis(0), &views)?;

        TimeSeries::new(
            first.variable.clone(),
            first.encoding,
            times,
            first.lat.clone(),
            first.lon.clone(),
            values,
        )
    }

    /// Cell-wise mean with an aligned series, e.g. daily maximum and minimum
    /// temperature into a mean temperature. A NaN on one side yields the other.
    pub fn mean_with(&self, other: &TimeSeries, variable: &str) -> Result<TimeSeries> {
        self.encoding.ensure_compatible(&other.encoding)?;
        ensure_same_shape(self.grid_shape(), other.grid_shape())?;
        if self.times != other.times {
            return Err(ClimateError::IncompatibleTime {
                left: format!("{} steps of `{}`", self.len(), self.variable),
                right: format!("{} steps of `{}`", other.len(), other.variable),
            });
        }

        let values = Zip::from(&self.values)
            .and(&other.values)
            .map_collect(|&a, &b| match (a.is_nan(), b.is_nan()) {
                (true, _) => b,
                (_, true) => a,
                _ => (a + b) / 2.0,
            });

        TimeSeries::new(
            variable,
            self.encoding,
            self.times.clone(),
            self.lat.clone(),
            self.lon.clone(),
            values,
        )
    }
}

pub fn ensure_increasing(times: &[f64]) -> Result<()> {
    for pair in times.windows(2) {
        if !(pair[1] > pair[0]) {
            return Err(ClimateError::NonMonotonicTime {
                previous: pair[0],
                next: pair[1],
            });
        }
    }
    Ok(())
}

/// Names and free-text metadata of a compiled store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Data variable name, default `var`.
    pub variable: String,
    /// Time dimension name, default `time`.
    pub time_name: String,
    /// Horizontal dimension name, default `longitude`.
    pub x_name: String,
    /// Vertical dimension name, default `latitude`.
    pub y_name: String,
    /// Dataset description, default empty.
    pub description: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            variable: "var".to_string(),
            time_name: "time".to_string(),
            x_name: "longitude".to_string(),
            y_name: "latitude".to_string(),
            description: String::new(),
        }
    }
}

/// Everything fixed when a store is created.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    pub options: StoreOptions,
    pub encoding: TimeEncoding,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub history: String,
}

impl StoreHeader {
    pub fn new(options: StoreOptions, encoding: TimeEncoding, lat: Vec<f64>, lon: Vec<f64>) -> Self {
        StoreHeader {
            options,
            encoding,
            lat,
            lon,
            history: format!("Created {}", Local::now().format("%a %b %e %H:%M:%S %Y")),
        }
    }

    /// Header for a store compiled from chunks shaped like `series`.
    pub fn for_series(options: StoreOptions, series: &TimeSeries) -> Self {
        StoreHeader::new(options, series.encoding, series.lat.clone(), series.lon.clone())
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }
}

/// An append-only store with an unlimited time dimension.
pub trait SeriesStore: Sized {
    /// Creates a new store. Fails if `path` already exists.
    fn create(path: &Path, header: &StoreHeader) -> Result<Self>;

    fn len(&self) -> usize;

    fn last_time(&self) -> Option<f64>;

    /// Appends `values` [time, lat, lon] after the current last step.
    fn append(&mut self, values: ArrayView3<f32>, times: &[f64]) -> Result<()>;

    /// Makes everything appended so far durable.
    fn sync(&mut self) -> Result<()>;

    fn finish(self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Arrow,
    NetCdf,
}

impl StoreFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match extension.as_deref() {
            Some("arrows") | Some("arrow") => Ok(StoreFormat::Arrow),
            Some("nc") | Some("nc4") => Ok(StoreFormat::NetCdf),
            _ => Err(ClimateError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Reads a whole series from a store or source chunk, picking the backend by extension.
pub fn read_series(path: &Path, variable: &str, axis_order: AxisOrder) -> Result<TimeSeries> {
    match StoreFormat::from_path(path)? {
        StoreFormat::Arrow => self::arrow::read_series(path, variable),
        StoreFormat::NetCdf => read_netcdf(path, variable, axis_order),
    }
}

#[cfg(feature = "netcdf")]
fn read_netcdf(path: &Path, variable: &str, axis_order: AxisOrder) -> Result<TimeSeries> {
    self::netcdf::read_series(path, variable, axis_order)
}

#[cfg(not(feature = "netcdf"))]
fn read_netcdf(path: &Path, _variable: &str, _axis_order: AxisOrder) -> Result<TimeSeries> {
    Err(ClimateError::UnsupportedFormat(format!(
        "{} (built without the `netcdf` feature)",
        path.display()
    )))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use std::path::PathBuf;

    use ndarray::Array3;

    use super::*;

    fn series(times: Vec<f64>, fill: f32) -> TimeSeries {
        let values = Array3::from_elem((times.len(), 2, 3), fill);
        TimeSeries::new(
            "tasmax",
            TimeEncoding::default(),
            times,
            vec![40.0, 41.0],
            vec![-105.0, -104.0, -103.0],
            values,
        )
        .unwrap()
    }

    #[test]
    fn should_validate_shape_and_order() {
        let values = Array3::<f32>::zeros((2, 2, 2));
        assert!(matches!(
            TimeSeries::new("v", TimeEncoding::default(), vec![0.0], vec![0.0, 1.0], vec![0.0, 1.0], values.clone()),
            Err(ClimateError::TimeLengthMismatch { times: 1, steps: 2 })
        ));
        assert!(matches!(
            TimeSeries::new("v", TimeEncoding::default(), vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0], values.clone()),
            Err(ClimateError::NonMonotonicTime { .. })
        ));
        assert!(matches!(
            TimeSeries::new("v", TimeEncoding::default(), vec![0.0, 1.0], vec![0.0], vec![0.0, 1.0], values),
            Err(ClimateError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn should_concatenate_in_time() {
        let joined = TimeSeries::concat(vec![
            series(vec![0.0, 1.0], 1.0),
            series(vec![2.0, 3.0, 4.0], 2.0),
        ])
        .unwrap();

        assert_eq!(joined.len(), 5);
        assert_eq!(joined.times, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(joined.values[[1, 0, 0]], 1.0);
        assert_eq!(joined.values[[2, 1, 2]], 2.0);
    }

    #[test]
    fn should_refuse_overlapping_concatenation() {
        let result = TimeSeries::concat(vec![series(vec![0.0, 1.0], 1.0), series(vec![1.0], 2.0)]);
        assert!(matches!(
            result,
            Err(ClimateError::NonMonotonicTime { previous, next }) if previous == 1.0 && next == 1.0
        ));
    }

    #[test]
    fn should_average_two_variables() {
        let tmax = series(vec![0.0, 1.0], 30.0);
        let mut tmin = series(vec![0.0, 1.0], 10.0);
        tmin.values[[0, 0, 0]] = f32::NAN;

        let tmean = tmax.mean_with(&tmin, "tmean").unwrap();
        assert_eq!(tmean.variable, "tmean");
        assert_eq!(tmean.values[[1, 1, 1]], 20.0);
        assert_eq!(tmean.values[[0, 0, 0]], 30.0);

        let shorter = series(vec![0.0], 10.0);
        assert!(tmax.mean_with(&shorter, "tmean").is_err());
    }

    #[test]
    fn should_pick_format_by_extension() {
        assert_eq!(
            StoreFormat::from_path(&PathBuf::from("pr_gridmet.arrows")).unwrap(),
            StoreFormat::Arrow
        );
        assert_eq!(
            StoreFormat::from_path(&PathBuf::from("pr_gridmet.NC")).unwrap(),
            StoreFormat::NetCdf
        );
        assert!(matches!(
            StoreFormat::from_path(&PathBuf::from("pr_gridmet.csv")),
            Err(ClimateError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn should_default_store_names() {
        let options = StoreOptions::default();
        assert_eq!(options.variable, "var");
        assert_eq!(options.time_name, "time");
        assert_eq!(options.x_name, "longitude");
        assert_eq!(options.y_name, "latitude");
        assert!(options.description.is_empty());
    }
}
