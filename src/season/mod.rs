//! Seasonal buckets and water-year bookkeeping.

pub mod classifier;

use std::fmt;

use serde::Deserialize;

use crate::error::{ClimateError, Result};

pub use classifier::SeasonClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonBucket {
    Annual,
    Winter,
    Spring,
    Summer,
    Autumn,
    WinterSpring,
    SummerFall,
}

impl SeasonBucket {
    /// The five canonical buckets, in the order products are written.
    pub const CANONICAL: [SeasonBucket; 5] = [
        SeasonBucket::Annual,
        SeasonBucket::Winter,
        SeasonBucket::Spring,
        SeasonBucket::Summer,
        SeasonBucket::Autumn,
    ];

    /// Numeric code used in logs and legacy product names.
    pub fn code(&self) -> u8 {
        match self {
            SeasonBucket::Annual => 0,
            SeasonBucket::Winter => 1,
            SeasonBucket::Spring => 2,
            SeasonBucket::Summer => 3,
            SeasonBucket::Autumn => 4,
            SeasonBucket::WinterSpring => 5,
            SeasonBucket::SummerFall => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SeasonBucket::Annual => "annual",
            SeasonBucket::Winter => "winter",
            SeasonBucket::Spring => "spring",
            SeasonBucket::Summer => "summer",
            SeasonBucket::Autumn => "autumn",
            SeasonBucket::WinterSpring => "winter_spring",
            SeasonBucket::SummerFall => "summer_fall",
        }
    }

    /// The lookup mode whose table produces this bucket.
    pub fn mode(&self) -> SeasonMode {
        match self {
            SeasonBucket::Annual => SeasonMode::Annual,
            SeasonBucket::Winter
            | SeasonBucket::Spring
            | SeasonBucket::Summer
            | SeasonBucket::Autumn => SeasonMode::Seasonal,
            SeasonBucket::WinterSpring | SeasonBucket::SummerFall => SeasonMode::TwoSeason,
        }
    }
}

impl fmt::Display for SeasonBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonMode {
    Annual,
    Seasonal,
    TwoSeason,
}

/// Month lookup tables, indexed by `month - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonTables {
    seasonal: [SeasonBucket; 12],
    two_season: [SeasonBucket; 12],
    water_year_delta: [i32; 12],
}

impl SeasonTables {
    pub fn new(
        seasonal: [SeasonBucket; 12],
        two_season: [SeasonBucket; 12],
        water_year_delta: [i32; 12],
    ) -> Self {
        SeasonTables {
            seasonal,
            two_season,
            water_year_delta,
        }
    }

    pub fn bucket(&self, month: u32, mode: SeasonMode) -> Result<SeasonBucket> {
        let slot = month_slot(month)?;

        Ok(match mode {
            SeasonMode::Annual => SeasonBucket::Annual,
            SeasonMode::Seasonal => self.seasonal[slot],
            SeasonMode::TwoSeason => self.two_season[slot],
        })
    }

    pub fn year_delta(&self, month: u32) -> Result<i32> {
        Ok(self.water_year_delta[month_slot(month)?])
    }
}

impl Default for SeasonTables {
    /// DJF/MAM/JJA/SON seasons, Dec-May and Jun-Nov half years, and a water
    /// year that moves October to December into the previous year.
    fn default() -> Self {
        use SeasonBucket::*;

        SeasonTables::new(
            [
                Winter, Winter, Spring, Spring, Spring, Summer, Summer, Summer, Autumn, Autumn,
                Autumn, Winter,
            ],
            [
                WinterSpring, WinterSpring, WinterSpring, WinterSpring, WinterSpring, SummerFall,
                SummerFall, SummerFall, SummerFall, SummerFall, SummerFall, WinterSpring,
            ],
            [0, 0, 0, 0, 0, 0, 0, 0, 0, -1, -1, -1],
        )
    }
}

fn month_slot(month: u32) -> Result<usize> {
    match month {
        1..=12 => Ok(month as usize - 1),
        _ => Err(ClimateError::InvalidMonth(month)),
    }
}

/// File naming prefix for a product, e.g. `midwest_winter_pr`.
pub fn product_prefix(label: &str, season: SeasonBucket, variable: &str) -> String {
    let label = label.replace(".1.", "_").replace('-', "_");

    [label.as_str(), season.label(), variable].join("_")
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn should_map_every_month_to_one_canonical_bucket() {
        let tables = SeasonTables::default();
        for month in 1..=12 {
            let seasonal = tables.bucket(month, SeasonMode::Seasonal).unwrap();
            assert!(SeasonBucket::CANONICAL.contains(&seasonal));
            assert_eq!(seasonal, tables.bucket(month, SeasonMode::Seasonal).unwrap());
            assert_eq!(
                tables.bucket(month, SeasonMode::Annual).unwrap(),
                SeasonBucket::Annual
            );
        }
    }

    #[test]
    fn should_put_december_in_winter() {
        let tables = SeasonTables::default();
        assert_eq!(tables.bucket(12, SeasonMode::Seasonal).unwrap(), SeasonBucket::Winter);
        assert_eq!(tables.bucket(9, SeasonMode::Seasonal).unwrap(), SeasonBucket::Autumn);
        assert_eq!(
            tables.bucket(12, SeasonMode::TwoSeason).unwrap(),
            SeasonBucket::WinterSpring
        );
        assert_eq!(
            tables.bucket(6, SeasonMode::TwoSeason).unwrap(),
            SeasonBucket::SummerFall
        );
    }

    #[test]
    fn should_reject_months_outside_the_calendar() {
        let tables = SeasonTables::default();
        assert!(matches!(
            tables.bucket(0, SeasonMode::Seasonal),
            Err(ClimateError::InvalidMonth(0))
        ));
        assert!(matches!(tables.year_delta(13), Err(ClimateError::InvalidMonth(13))));
    }

    #[test]
    fn should_build_product_prefixes() {
        assert_eq!(
            product_prefix("CCSM4.1.rcp85", SeasonBucket::Winter, "pr"),
            "CCSM4_rcp85_winter_pr"
        );
        assert_eq!(
            product_prefix("IPSL-CM5A-LR", SeasonBucket::SummerFall, "tmean"),
            "IPSL_CM5A_LR_summer_fall_tmean"
        );
    }

    #[test]
    fn should_report_codes_and_modes() {
        assert_eq!(SeasonBucket::Annual.code(), 0);
        assert_eq!(SeasonBucket::SummerFall.code(), 6);
        assert_eq!(SeasonBucket::Spring.mode(), SeasonMode::Seasonal);
        assert_eq!(SeasonBucket::WinterSpring.mode(), SeasonMode::TwoSeason);
    }
}
