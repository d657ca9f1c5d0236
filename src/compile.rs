//! Streaming compilation of source chunks into a single time-ordered store.

use std::{fmt, path::Path};

use ndarray::ArrayView3;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    error::{ClimateError, Result},
    grid::ensure_same_shape,
    store::{ensure_increasing, SeriesStore, StoreHeader, TimeSeries},
    time_coord::TimeEncoding,
};

/// How the time values of every chunk after the first are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeStepping {
    /// `last + k` days for the `k`-th step of the chunk, whatever the chunk says.
    #[default]
    Daily,
    /// The chunk's own values, which must continue after the last stored one.
    Source,
}

/// Lifecycle of a compiler. There is no compiler before its store exists,
/// and [`TimeSeriesCompiler::finalize`] consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileState {
    Created,
    Appending,
    Finalized,
}

/// Result of one product in a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductOutcome {
    Created,
    Skipped,
    Failed { reason: String },
}

impl ProductOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ProductOutcome::Failed { .. })
    }
}

impl fmt::Display for ProductOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductOutcome::Created => write!(f, "created"),
            ProductOutcome::Skipped => write!(f, "skipped (output exists)"),
            ProductOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

pub enum Opened<S: SeriesStore> {
    Created(TimeSeriesCompiler<S>),
    /// The output already existed and was left untouched.
    Skipped,
}

pub struct TimeSeriesCompiler<S: SeriesStore> {
    store: S,
    encoding: TimeEncoding,
    grid_shape: (usize, usize),
    lat: Vec<f64>,
    lon: Vec<f64>,
    stepping: TimeStepping,
    state: CompileState,
}

impl<S: SeriesStore> TimeSeriesCompiler<S> {
    /// Creates the store at `path` unless something is already there.
    pub fn open_or_create(
        path: &Path,
        header: &StoreHeader,
        stepping: TimeStepping,
    ) -> Result<Opened<S>> {
        if path.exists() {
            info!(path = %path.display(), "output exists, skipping");
            return Ok(Opened::Skipped);
        }

        let store = S::create(path, header)?;
        Ok(Opened::Created(TimeSeriesCompiler {
            store,
            encoding: header.encoding,
            grid_shape: header.grid_shape(),
            lat: header.lat.clone(),
            lon: header.lon.clone(),
            stepping,
            state: CompileState::Created,
        }))
    }

    pub fn state(&self) -> CompileState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Appends a prepared chunk. Returns the number of steps written.
    pub fn append_chunk(&mut self, chunk: &TimeSeries) -> Result<usize> {
        self.encoding.ensure_compatible(&chunk.encoding)?;
        ensure_same_shape(self.grid_shape, chunk.grid_shape())?;
        ensure_same_coords("latitude", &self.lat, &chunk.lat)?;
        ensure_same_coords("longitude", &self.lon, &chunk.lon)?;
        self.append_values(chunk.values.view(), &chunk.times)
    }

    /// Appends raw values [time, lat, lon] with the chunk's own time values.
    /// The first chunk keeps its times; later ones follow [`TimeStepping`].
    pub fn append_values(&mut self, values: ArrayView3<f32>, chunk_times: &[f64]) -> Result<usize> {
        let (steps, nlat, nlon) = values.dim();
        ensure_same_shape(self.grid_shape, (nlat, nlon))?;
        if steps != chunk_times.len() {
            return Err(ClimateError::TimeLengthMismatch {
                times: chunk_times.len(),
                steps,
            });
        }
        if steps == 0 {
            warn!("empty chunk, nothing appended");
            return Ok(0);
        }

        let times = self.next_times(chunk_times)?;
        self.store.append(values, &times)?;
        self.state = CompileState::Appending;

        debug!(
            steps,
            total = self.store.len(),
            first = times[0],
            last = times[steps - 1],
            "appended chunk"
        );
        Ok(steps)
    }

    fn next_times(&self, chunk_times: &[f64]) -> Result<Vec<f64>> {
        let Some(last) = self.store.last_time() else {
            ensure_increasing(chunk_times)?;
            return Ok(chunk_times.to_vec());
        };

        match self.stepping {
            TimeStepping::Daily => {
                let step = self.encoding.day_step();
                Ok((1..=chunk_times.len())
                    .map(|k| last + k as f64 * step)
                    .collect())
            }
            TimeStepping::Source => {
                ensure_increasing(chunk_times)?;
                match chunk_times.first() {
                    Some(&next) if next <= last => {
                        Err(ClimateError::NonMonotonicTime { previous: last, next })
                    }
                    _ => Ok(chunk_times.to_vec()),
                }
            }
        }
    }

    /// Closes the store and returns the number of stored steps.
    pub fn finalize(self) -> Result<usize> {
        let len = self.store.len();
        self.store.finish()?;
        debug!(len, state = ?CompileState::Finalized, "store finalized");
        Ok(len)
    }
}

/// Coordinates match when they differ by less than a millionth of a degree.
const COORD_TOLERANCE: f64 = 1e-6;

fn ensure_same_coords(axis: &'static str, expected: &[f64], found: &[f64]) -> Result<()> {
    match expected
        .iter()
        .zip(found)
        .position(|(e, f)| (e - f).abs() > COORD_TOLERANCE)
    {
        Some(index) => Err(ClimateError::CoordinateMismatch {
            axis,
            index,
            expected: expected[index],
            found: found[index],
        }),
        None => Ok(()),
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use std::fs;

    use ndarray::Array3;
    use tempfile::tempdir;

    use super::*;
    use crate::store::{arrow::read_series, ArrowStore, StoreOptions};

    fn header() -> StoreHeader {
        StoreHeader::new(
            StoreOptions::default(),
            TimeEncoding::default(),
            vec![40.0, 41.0],
            vec![-110.0, -109.0],
        )
    }

    fn chunk(times: Vec<f64>) -> TimeSeries {
        let values = Array3::from_elem((times.len(), 2, 2), 1.0f32);
        TimeSeries::new(
            "var",
            TimeEncoding::default(),
            times,
            vec![40.0, 41.0],
            vec![-110.0, -109.0],
            values,
        )
        .unwrap()
    }

    fn created(path: &Path, stepping: TimeStepping) -> TimeSeriesCompiler<ArrowStore> {
        match TimeSeriesCompiler::open_or_create(path, &header(), stepping).unwrap() {
            Opened::Created(compiler) => compiler,
            Opened::Skipped => panic!("store unexpectedly exists"),
        }
    }

    #[test]
    fn should_recompute_times_after_the_first_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("var.arrows");

        let mut compiler = created(&path, TimeStepping::Daily);
        assert_eq!(compiler.state(), CompileState::Created);

        compiler.append_chunk(&chunk(vec![100.0, 101.0, 102.0])).unwrap();
        assert_eq!(compiler.state(), CompileState::Appending);
        // A restarted source chunk still continues the daily sequence.
        compiler.append_chunk(&chunk(vec![0.0, 1.0])).unwrap();
        assert_eq!(compiler.finalize().unwrap(), 5);

        let series = read_series(&path, "var").unwrap();
        assert_eq!(series.times, vec![100.0, 101.0, 102.0, 103.0, 104.0]);
    }

    #[test]
    fn should_keep_source_times_when_asked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("var.arrows");

        let mut compiler = created(&path, TimeStepping::Source);
        compiler.append_chunk(&chunk(vec![15.0, 45.0])).unwrap();
        compiler.append_chunk(&chunk(vec![74.0, 105.0])).unwrap();
        assert!(matches!(
            compiler.append_chunk(&chunk(vec![100.0])),
            Err(ClimateError::NonMonotonicTime { previous, next }) if previous == 105.0 && next == 100.0
        ));
        compiler.finalize().unwrap();

        let series = read_series(&path, "var").unwrap();
        assert_eq!(series.times, vec![15.0, 45.0, 74.0, 105.0]);
    }

    #[test]
    fn should_skip_an_existing_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("var.arrows");
        fs::write(&path, b"previous run").unwrap();

        let opened =
            TimeSeriesCompiler::<ArrowStore>::open_or_create(&path, &header(), TimeStepping::Daily)
                .unwrap();

        assert!(matches!(opened, Opened::Skipped));
        assert_eq!(fs::read(&path).unwrap(), b"previous run");
    }

    #[test]
    fn should_reject_a_chunk_on_another_grid() {
        let dir = tempdir().unwrap();
        let mut compiler = created(&dir.path().join("var.arrows"), TimeStepping::Daily);

        let wrong = Array3::<f32>::zeros((1, 3, 2));
        assert!(matches!(
            compiler.append_values(wrong.view(), &[0.0]),
            Err(ClimateError::ShapeMismatch {
                expected: (2, 2),
                found: (3, 2)
            })
        ));
        assert_eq!(compiler.len(), 0);
    }

    #[test]
    fn should_reject_a_chunk_from_another_window() {
        let dir = tempdir().unwrap();
        let mut compiler = created(&dir.path().join("var.arrows"), TimeStepping::Daily);
        compiler.append_chunk(&chunk(vec![0.0])).unwrap();

        let mut shifted = chunk(vec![1.0]);
        shifted.lon = vec![-109.0, -108.0];
        assert!(matches!(
            compiler.append_chunk(&shifted),
            Err(ClimateError::CoordinateMismatch { axis: "longitude", index: 0, .. })
        ));

        let mut noisy = chunk(vec![1.0]);
        noisy.lat = vec![40.0 + 1e-9, 41.0];
        compiler.append_chunk(&noisy).unwrap();
        assert_eq!(compiler.len(), 2);
    }

    #[test]
    fn should_reject_other_time_units() {
        let dir = tempdir().unwrap();
        let mut compiler = created(&dir.path().join("var.arrows"), TimeStepping::Daily);

        let mut other = chunk(vec![0.0]);
        other.encoding = TimeEncoding::parse("days since 1900-01-01", "standard").unwrap();
        assert!(matches!(
            compiler.append_chunk(&other),
            Err(ClimateError::IncompatibleTime { .. })
        ));
    }

    #[test]
    fn should_keep_synced_chunks_after_a_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("var.arrows");

        let mut compiler = created(&path, TimeStepping::Source);
        compiler.append_chunk(&chunk(vec![0.0, 1.0])).unwrap();
        assert!(compiler.append_chunk(&chunk(vec![1.0, 2.0])).is_err());
        // Abandoned without `finalize`.
        drop(compiler);

        let series = read_series(&path, "var").unwrap();
        assert_eq!(series.times, vec![0.0, 1.0]);
    }
}
