//! Cell-wise operations on (lat, lon) grids and (time, lat, lon) stacks.

pub mod clip;

use chrono::{Datelike, Months, NaiveDateTime};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use serde::Deserialize;

use crate::error::{ClimateError, Result};

pub use clip::{Bounds, ClipWindow, LatitudeOrder};

/// Seconds in a day, the factor between a per-second flux and a daily depth.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Precipitation scale used for the NEX-DCP30 monthly ensembles: kg m-2 s-1 to
/// mm per month, with a fixed month of roughly 30.09 days (2.6e6 / 86 400).
pub const NEX_PRECIPITATION_SCALE: f64 = 2_600_000.0;

pub const KELVIN_OFFSET: f64 = -273.15;

/// `value * scale + offset`, applied cell by cell.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearTransform {
    pub scale: f64,
    pub offset: f64,
}

impl LinearTransform {
    pub const IDENTITY: LinearTransform = LinearTransform {
        scale: 1.0,
        offset: 0.0,
    };

    pub const KELVIN_TO_CELSIUS: LinearTransform = LinearTransform {
        scale: 1.0,
        offset: KELVIN_OFFSET,
    };

    pub fn new(scale: f64, offset: f64) -> Self {
        LinearTransform { scale, offset }
    }

    /// Precipitation rate (kg m-2 s-1) to a depth in mm accumulated over a
    /// month of `days_in_month` days.
    pub fn flux_to_monthly_depth(days_in_month: f64) -> Self {
        LinearTransform::new(SECONDS_PER_DAY * days_in_month, 0.0)
    }

    pub fn is_identity(&self) -> bool {
        *self == LinearTransform::IDENTITY
    }

    pub fn apply(&self, value: f32) -> f32 {
        value * self.scale as f32 + self.offset as f32
    }
}

impl Default for LinearTransform {
    fn default() -> Self {
        LinearTransform::IDENTITY
    }
}

/// Named conversions selectable from a job file.
///
/// ```toml
/// transform = "kelvin_to_celsius"
/// transform = "nex_precipitation"
/// transform = { flux_to_depth = {} }                    # each step's own month length
/// transform = { flux_to_depth = { days_in_month = 30 } }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformPreset {
    Identity,
    KelvinToCelsius,
    /// Flux to depth with the fixed [`NEX_PRECIPITATION_SCALE`].
    NexPrecipitation,
    FluxToDepth {
        #[serde(default)]
        days_in_month: Option<f64>,
    },
}

/// A preset or a raw `{ scale, offset }` pair.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UnitTransform {
    Preset(TransformPreset),
    Linear(LinearTransform),
}

impl Default for UnitTransform {
    fn default() -> Self {
        UnitTransform::Linear(LinearTransform::IDENTITY)
    }
}

impl UnitTransform {
    /// The linear transform for a step dated `date`.
    pub fn linear_for(&self, date: NaiveDateTime) -> Result<LinearTransform> {
        Ok(match self {
            UnitTransform::Linear(transform) => *transform,
            UnitTransform::Preset(TransformPreset::Identity) => LinearTransform::IDENTITY,
            UnitTransform::Preset(TransformPreset::KelvinToCelsius) => {
                LinearTransform::KELVIN_TO_CELSIUS
            }
            UnitTransform::Preset(TransformPreset::NexPrecipitation) => {
                LinearTransform::new(NEX_PRECIPITATION_SCALE, 0.0)
            }
            UnitTransform::Preset(TransformPreset::FluxToDepth { days_in_month }) => {
                let days = match days_in_month {
                    Some(days) => *days,
                    None => days_in_month_of(date)?,
                };
                LinearTransform::flux_to_monthly_depth(days)
            }
        })
    }

    /// Whether the transform varies from one step to the next.
    fn is_dated(&self) -> bool {
        matches!(
            self,
            UnitTransform::Preset(TransformPreset::FluxToDepth { days_in_month: None })
        )
    }
}

/// Number of days in the month of `date`.
pub fn days_in_month_of(date: NaiveDateTime) -> Result<f64> {
    let out_of_range = || ClimateError::DateOutOfRange(format!("month after {date}"));
    let first = date.date().with_day(1).ok_or_else(out_of_range)?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or_else(out_of_range)?;

    Ok((next - first).num_days() as f64)
}

/// Applies `transform` to every step of `values`, each with the date in
/// `dates` at the same position.
pub fn apply_unit_transform(
    mut values: Array3<f32>,
    transform: &UnitTransform,
    dates: &[NaiveDateTime],
) -> Result<Array3<f32>> {
    let steps = values.len_of(Axis(0));
    if steps != dates.len() {
        return Err(ClimateError::TimeLengthMismatch {
            times: dates.len(),
            steps,
        });
    }
    let Some(&first) = dates.first() else {
        return Ok(values);
    };

    if !transform.is_dated() {
        let linear = transform.linear_for(first)?;
        if !linear.is_identity() {
            values.mapv_inplace(|v| linear.apply(v));
        }
        return Ok(values);
    }

    for (mut step, &date) in values.axis_iter_mut(Axis(0)).zip(dates) {
        let linear = transform.linear_for(date)?;
        step.mapv_inplace(|v| linear.apply(v));
    }
    Ok(values)
}

/// Storage order of the dimensions of a source variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrder {
    #[default]
    TimeLatLon,
    LonLatTime,
}

impl AxisOrder {
    /// Reorders `values` to (time, lat, lon).
    pub fn to_time_lat_lon(&self, values: Array3<f32>) -> Array3<f32> {
        match self {
            AxisOrder::TimeLatLon => values,
            AxisOrder::LonLatTime => values.permuted_axes([2, 1, 0]).as_standard_layout().to_owned(),
        }
    }
}

/// Reverses the row (latitude) order, turning a south-up grid north-up.
pub fn flip_latitude(grid: ArrayView2<f32>) -> Array2<f32> {
    grid.slice(s![..;-1, ..]).to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceMethod {
    Sum,
    Mean,
}

/// Reduces the time steps of each group to a single grid. NaN cells are left
/// out; a cell with nothing left, including every cell of an empty group, is NaN.
pub fn reduce(
    values: ArrayView3<f32>,
    groups: &[Vec<usize>],
    method: ReduceMethod,
) -> Result<Vec<Array2<f32>>> {
    let len = values.len_of(Axis(0));
    let shape = (values.len_of(Axis(1)), values.len_of(Axis(2)));

    groups
        .iter()
        .map(|group| {
            let mut sums = Array2::<f64>::zeros(shape);
            let mut counts = Array2::<u32>::zeros(shape);

            for &index in group {
                if index >= len {
                    return Err(ClimateError::IndexOutOfBounds { index, len });
                }
                Zip::from(&mut sums)
                    .and(&mut counts)
                    .and(values.index_axis(Axis(0), index))
                    .for_each(|sum, count, &v| {
                        if !v.is_nan() {
                            *sum += v as f64;
                            *count += 1;
                        }
                    });
            }

            Ok(Zip::from(&sums).and(&counts).map_collect(|&sum, &count| {
                if count == 0 {
                    f32::NAN
                } else {
                    match method {
                        ReduceMethod::Sum => sum as f32,
                        ReduceMethod::Mean => (sum / count as f64) as f32,
                    }
                }
            }))
        })
        .collect()
}

/// Cell-wise mean over several grids, ignoring NaN cells.
pub fn mean_grids(grids: &[Array2<f32>]) -> Result<Array2<f32>> {
    let first = grids
        .first()
        .ok_or(ClimateError::InvalidState("no grids to average"))?;
    let shape = first.dim();

    let mut stack = Array3::<f32>::zeros((grids.len(), shape.0, shape.1));
    for (i, grid) in grids.iter().enumerate() {
        ensure_same_shape(shape, grid.dim())?;
        stack.index_axis_mut(Axis(0), i).assign(grid);
    }

    let all: Vec<usize> = (0..grids.len()).collect();
    let mut reduced = reduce(stack.view(), &[all], ReduceMethod::Mean)?;

    Ok(reduced.remove(0))
}

/// `(future - historical) / historical * 100`, with zero historical cells
/// replaced by 0.01 in the denominator.
pub fn percent_change(historical: ArrayView2<f32>, future: ArrayView2<f32>) -> Result<Array2<f32>> {
    ensure_same_shape(historical.dim(), future.dim())?;

    Ok(Zip::from(&historical).and(&future).map_collect(|&h, &f| {
        let denominator = if h == 0.0 { 0.01 } else { h };
        (f - h) / denominator * 100.0
    }))
}

pub fn delta(historical: ArrayView2<f32>, future: ArrayView2<f32>) -> Result<Array2<f32>> {
    ensure_same_shape(historical.dim(), future.dim())?;

    Ok(&future - &historical)
}

pub fn ensure_same_shape(expected: (usize, usize), found: (usize, usize)) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ClimateError::ShapeMismatch { expected, found })
    }
}

// -- Tests -------------------------------------------------------------------
