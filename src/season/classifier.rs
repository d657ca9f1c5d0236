//! Water-year aware selection of time steps by year and season.
//!
//! Selection happens on calendar dates, then every selected date is moved into
//! its water year and looked up again in the encoded time axis. With the
//! default tables, October to December of year `Y` resolve to the same months
//! of `Y - 1`, so the winter of `Y` is Dec(`Y - 1`) + Jan + Feb(`Y`) and the
//! annual mask of `Y` is the water year Oct(`Y - 1`) .. Sep(`Y`).

use chrono::{Datelike, NaiveDateTime};
use tracing::debug;

use crate::{
    error::{ClimateError, Result},
    time_coord::{TimeEncoding, TimeIndex},
};

use super::{SeasonBucket, SeasonMode, SeasonTables};

#[derive(Debug, Clone, Default)]
pub struct SeasonClassifier {
    tables: SeasonTables,
}

/// A selected time step whose water-year date is not on the time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedTime {
    pub year: i32,
    pub source_index: usize,
    pub date: NaiveDateTime,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskResolution {
    /// One list of series positions per requested year.
    pub masks: Vec<Vec<usize>>,
    pub unresolved: Vec<UnresolvedTime>,
}

impl MaskResolution {
    pub fn into_strict(self) -> Result<Vec<Vec<usize>>> {
        match self.unresolved.first() {
            Some(missing) => Err(ClimateError::ValueExactMatchNotFound {
                date: missing.date,
                value: missing.value,
            }),
            None => Ok(self.masks),
        }
    }
}

impl SeasonClassifier {
    pub fn bucket_for(&self, month: u32, mode: SeasonMode) -> Result<SeasonBucket> {
        self.tables.bucket(month, mode)
    }

    pub fn water_year_shift(&self, date: NaiveDateTime) -> Result<NaiveDateTime> {
        let delta = self.tables.year_delta(date.month())?;
        if delta == 0 {
            return Ok(date);
        }

        date.with_year(date.year() + delta)
            .ok_or_else(|| ClimateError::DateOutOfRange(format!("{date} shifted by {delta} years")))
    }

    /// Positions of every time step in `season` for each of `years`. Fails with
    /// [`ClimateError::ValueExactMatchNotFound`] when a shifted date is missing
    /// from `time_values`.
    pub fn build_year_season_mask(
        &self,
        dates: &[NaiveDateTime],
        time_values: &[f64],
        years: &[i32],
        season: SeasonBucket,
        encoding: &TimeEncoding,
    ) -> Result<Vec<Vec<usize>>> {
        self.resolve_year_season_mask(dates, time_values, years, season, encoding)?
            .into_strict()
    }

    /// Like [`build_year_season_mask`](Self::build_year_season_mask) but leaves
    /// unmatched dates out of the masks and reports them instead.
    pub fn resolve_year_season_mask(
        &self,
        dates: &[NaiveDateTime],
        time_values: &[f64],
        years: &[i32],
        season: SeasonBucket,
        encoding: &TimeEncoding,
    ) -> Result<MaskResolution> {
        if dates.len() != time_values.len() {
            return Err(ClimateError::TimeLengthMismatch {
                times: time_values.len(),
                steps: dates.len(),
            });
        }

        let mode = season.mode();
        let buckets = dates
            .iter()
            .map(|date| self.bucket_for(date.month(), mode))
            .collect::<Result<Vec<_>>>()?;
        let index = TimeIndex::new(time_values);

        let mut resolution = MaskResolution {
            masks: Vec::with_capacity(years.len()),
            unresolved: Vec::new(),
        };

        for &year in years {
            let mut mask = Vec::new();

            for (i, date) in dates.iter().enumerate() {
                if date.year() != year || buckets[i] != season {
                    continue;
                }

                let shifted = self.water_year_shift(*date)?;
                let value = encoding.encode(shifted);
                match index.position(value) {
                    Some(position) => mask.push(position),
                    None => resolution.unresolved.push(UnresolvedTime {
                        year,
                        source_index: i,
                        date: shifted,
                        value,
                    }),
                }
            }

            debug!(
                year,
                season = %season,
                code = season.code(),
                steps = mask.len(),
                "built water-year mask"
            );
            resolution.masks.push(mask);
        }

        Ok(resolution)
    }
}

// -- Tests -------------------------------------------------------------------
