//! Job files: the products to compile and summarise, in TOML.
//!
//! ```toml
//! output_dir = "out"
//!
//! [[compile]]
//! name = "macav2_tasmax_rcp85"
//! chunk_dir = "raw/tasmax"
//! source = { variable = "air_temperature", lon_offset = -360.0, transform = "kelvin_to_celsius" }
//! store = { variable = "tasmax", description = "MACAv2 daily maximum temperature" }
//!
//! [[summary]]
//! label = "colorado"
//! variable = "tasmax"
//! historical = ["out/macav2_tasmax_historical.arrows"]
//! future = ["out/macav2_tasmax_rcp85.arrows"]
//! historical_years = [1971, 2000]
//! future_years = [2036, 2065]
//! reduce = "mean"
//! change = "delta"
//! ```
//!
//! Relative paths are taken from the directory holding the job file.

use std::{
    fs,
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::{
    compile::TimeStepping,
    export::GeoTransform,
    grid::{AxisOrder, ReduceMethod},
    season::SeasonBucket,
    source::SourceOptions,
    store::StoreOptions,
    summary::{ChangeMetric, MissingTime, SummaryRequest},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    /// Defaults to `~/climseason`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub compile: Vec<CompileProduct>,
    #[serde(default)]
    pub summary: Vec<SummaryProduct>,
}

fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("climseason")
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompileProduct {
    /// Output file stem.
    pub name: String,
    /// Store extension, `arrows` or `nc`.
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub chunks: Vec<PathBuf>,
    /// Directory scanned for chunk files ending in `chunk_suffix`, in name order.
    #[serde(default)]
    pub chunk_dir: Option<PathBuf>,
    #[serde(default = "default_chunk_suffix")]
    pub chunk_suffix: String,
    pub source: SourceOptions,
    #[serde(default)]
    pub store: StoreOptions,
    #[serde(default)]
    pub stepping: TimeStepping,
}

fn default_extension() -> String {
    "arrows".to_string()
}

fn default_chunk_suffix() -> String {
    ".nc".to_string()
}

impl CompileProduct {
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.{}", self.name, self.extension))
    }

    /// Listed chunks first, then the matching files of `chunk_dir`.
    pub fn chunk_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = self.chunks.clone();

        if let Some(dir) = &self.chunk_dir {
            let mut found = Vec::new();
            for entry in fs::read_dir(dir)
                .with_context(|| format!("failed to list chunk directory {}", dir.display()))?
            {
                let path = entry?.path();
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&self.chunk_suffix));
                if path.is_file() && matches {
                    found.push(path);
                }
            }
            found.sort();
            paths.extend(found);
        }

        if paths.is_empty() {
            bail!("product `{}` has no source chunks", self.name);
        }
        Ok(paths)
    }
}

/// A second variable averaged cell by cell with the first, e.g. tasmin with
/// tasmax to give tmean.
#[derive(Debug, Clone, Deserialize)]
pub struct PairedVariable {
    pub variable: String,
    pub historical: Vec<PathBuf>,
    pub future: Vec<PathBuf>,
    /// Name of the averaged variable in output names.
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryProduct {
    pub label: String,
    pub variable: String,
    /// Stores joined in time, in the order given.
    pub historical: Vec<PathBuf>,
    pub future: Vec<PathBuf>,
    #[serde(default)]
    pub pair: Option<PairedVariable>,
    pub historical_years: [i32; 2],
    pub future_years: [i32; 2],
    #[serde(default = "default_seasons")]
    pub seasons: Vec<SeasonBucket>,
    pub reduce: ReduceMethod,
    #[serde(default)]
    pub change: ChangeMetric,
    #[serde(default)]
    pub missing_time: MissingTime,
    #[serde(default)]
    pub flip: bool,
    #[serde(default)]
    pub axis_order: AxisOrder,
    /// Raster placement; derived from the grid coordinates when absent.
    #[serde(default)]
    pub geotransform: Option<GeoTransform>,
    /// Also write a parquet table of every grid.
    #[serde(default)]
    pub table: bool,
}

fn default_seasons() -> Vec<SeasonBucket> {
    SeasonBucket::CANONICAL.to_vec()
}

fn years(range: [i32; 2], what: &str) -> Result<RangeInclusive<i32>> {
    let [start, end] = range;
    if start > end {
        bail!("{what} years run backwards: {start} > {end}");
    }
    Ok(start..=end)
}

impl SummaryProduct {
    pub fn request(&self) -> Result<SummaryRequest> {
        Ok(SummaryRequest {
            historical_years: years(self.historical_years, "historical")?,
            future_years: years(self.future_years, "future")?,
            reduce: self.reduce,
            change: self.change,
            missing_time: self.missing_time,
            flip: self.flip,
        })
    }

    /// Variable name used in output file names.
    pub fn output_variable(&self) -> &str {
        match &self.pair {
            Some(pair) => &pair.name,
            None => &self.variable,
        }
    }
}

impl Job {
    pub fn load(path: &Path) -> Result<Job> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        let job: Job = toml::from_str(&text)
            .with_context(|| format!("failed to parse job file {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(job.resolve(base))
    }

    fn resolve(mut self, base: &Path) -> Job {
        let at = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        at(&mut self.output_dir);
        for product in &mut self.compile {
            product.chunks.iter_mut().for_each(at);
            if let Some(dir) = &mut product.chunk_dir {
                at(dir);
            }
        }
        for product in &mut self.summary {
            product.historical.iter_mut().for_each(at);
            product.future.iter_mut().for_each(at);
            if let Some(pair) = &mut product.pair {
                pair.historical.iter_mut().for_each(at);
                pair.future.iter_mut().for_each(at);
            }
        }

        self
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use tempfile::tempdir;

    use super::*;
    use crate::grid::{LinearTransform, UnitTransform};

    const JOB: &str = r#"
        output_dir = "out"

        [[compile]]
        name = "nex_pr_rcp85"
        chunks = ["raw/pr_200601-201012.nc"]
        stepping = "source"
        source = { variable = "pr", transform = { scale = 2600000.0 } }

        [[summary]]
        label = "midwest"
        variable = "pr"
        historical = ["out/nex_pr_historical.arrows"]
        future = ["out/nex_pr_rcp85.arrows"]
        historical_years = [1971, 2000]
        future_years = [2036, 2065]
        reduce = "sum"
    "#;

    #[test]
    fn should_fill_in_defaults() {
        let job: Job = toml::from_str(JOB).unwrap();

        let compile = &job.compile[0];
        assert_eq!(compile.extension, "arrows");
        assert_eq!(compile.stepping, TimeStepping::Source);
        assert_eq!(compile.store, StoreOptions::default());
        assert_eq!(
            compile.source.transform,
            UnitTransform::Linear(LinearTransform::new(2_600_000.0, 0.0))
        );
        assert_eq!(compile.source.axis_order, AxisOrder::TimeLatLon);
        assert_eq!(compile.output_path(Path::new("/data")), PathBuf::from("/data/nex_pr_rcp85.arrows"));

        let summary = &job.summary[0];
        assert_eq!(summary.seasons, SeasonBucket::CANONICAL.to_vec());
        assert_eq!(summary.change, ChangeMetric::PercentChange);
        assert_eq!(summary.missing_time, MissingTime::Fail);
        assert!(!summary.flip);
        assert_eq!(summary.output_variable(), "pr");
        assert_eq!(summary.request().unwrap().historical_years, 1971..=2000);
    }

    #[test]
    fn should_resolve_paths_next_to_the_job_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(&path, JOB).unwrap();

        let job = Job::load(&path).unwrap();
        assert_eq!(job.output_dir, dir.path().join("out"));
        assert_eq!(job.compile[0].chunks[0], dir.path().join("raw/pr_200601-201012.nc"));
        assert_eq!(job.summary[0].future[0], dir.path().join("out/nex_pr_rcp85.arrows"));
    }

    #[test]
    fn should_list_chunks_in_name_order() {
        let dir = tempdir().unwrap();
        for name in ["tasmax_2011_2015.nc", "tasmax_2006_2010.nc", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let product = CompileProduct {
            name: "tasmax".to_string(),
            extension: default_extension(),
            chunks: vec![],
            chunk_dir: Some(dir.path().to_path_buf()),
            chunk_suffix: default_chunk_suffix(),
            source: SourceOptions::new("air_temperature"),
            store: StoreOptions::default(),
            stepping: TimeStepping::Daily,
        };

        let paths = product.chunk_paths().unwrap();
        assert_eq!(
            paths,
            vec![
                dir.path().join("tasmax_2006_2010.nc"),
                dir.path().join("tasmax_2011_2015.nc")
            ]
        );
    }

    #[test]
    fn should_reject_backwards_years() {
        let mut job: Job = toml::from_str(JOB).unwrap();
        job.summary[0].future_years = [2065, 2036];
        assert!(job.summary[0].request().is_err());
    }
}
