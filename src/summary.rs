//! Historical and future seasonal means of a compiled series, and the change
//! between them.

use std::ops::RangeInclusive;

use ndarray::Array2;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    error::Result,
    grid::{delta, flip_latitude, mean_grids, percent_change, reduce, ReduceMethod},
    season::{SeasonBucket, SeasonClassifier},
    store::TimeSeries,
};

/// What to do with selected steps whose water-year date is not in the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTime {
    #[default]
    Fail,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMetric {
    #[default]
    PercentChange,
    Delta,
}

impl ChangeMetric {
    pub fn suffix(&self) -> &'static str {
        match self {
            ChangeMetric::PercentChange => "pctchange",
            ChangeMetric::Delta => "delta",
        }
    }

    pub fn apply(&self, historical: &Array2<f32>, future: &Array2<f32>) -> Result<Array2<f32>> {
        match self {
            ChangeMetric::PercentChange => percent_change(historical.view(), future.view()),
            ChangeMetric::Delta => delta(historical.view(), future.view()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    pub historical_years: RangeInclusive<i32>,
    pub future_years: RangeInclusive<i32>,
    pub reduce: ReduceMethod,
    pub change: ChangeMetric,
    pub missing_time: MissingTime,
    /// Reverse the row order of every output grid.
    pub flip: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonSummary {
    pub season: SeasonBucket,
    pub historical: Array2<f32>,
    pub future: Array2<f32>,
    pub change: Array2<f32>,
}

/// Label of a period in output names: its middle year, e.g. 1985 for 1971..=2000.
pub fn period_label(years: &RangeInclusive<i32>) -> i32 {
    (years.start() + years.end()).div_euclid(2)
}

/// Reduces each year of `years` in `season` separately, then averages the
/// per-year grids.
pub fn period_mean(
    classifier: &SeasonClassifier,
    series: &TimeSeries,
    years: &RangeInclusive<i32>,
    season: SeasonBucket,
    method: ReduceMethod,
    missing_time: MissingTime,
) -> Result<Array2<f32>> {
    let dates = series.dates()?;
    let years: Vec<i32> = years.clone().collect();

    let masks = match missing_time {
        MissingTime::Fail => classifier.build_year_season_mask(
            &dates,
            &series.times,
            &years,
            season,
            &series.encoding,
        )?,
        MissingTime::Drop => {
            let resolution = classifier.resolve_year_season_mask(
                &dates,
                &series.times,
                &years,
                season,
                &series.encoding,
            )?;
            if let Some(first) = resolution.unresolved.first() {
                warn!(
                    season = %season,
                    dropped = resolution.unresolved.len(),
                    first = %first.date,
                    "dropping time steps missing from the series"
                );
            }
            resolution.masks
        }
    };

    let grids = reduce(series.values.view(), &masks, method)?;
    debug!(season = %season, years = grids.len(), "reduced period");

    mean_grids(&grids)
}

pub fn summarize_season(
    classifier: &SeasonClassifier,
    historical: &TimeSeries,
    future: &TimeSeries,
    season: SeasonBucket,
    request: &SummaryRequest,
) -> Result<SeasonSummary> {
    let mean = |series: &TimeSeries, years: &RangeInclusive<i32>| {
        period_mean(
            classifier,
            series,
            years,
            season,
            request.reduce,
            request.missing_time,
        )
    };

    let mut historical = mean(historical, &request.historical_years)?;
    let mut future = mean(future, &request.future_years)?;
    if request.flip {
        historical = flip_latitude(historical.view());
        future = flip_latitude(future.view());
    }
    let change = request.change.apply(&historical, &future)?;

    Ok(SeasonSummary {
        season,
        historical,
        future,
        change,
    })
}

// -- Tests -------------------------------------------------------------------
