use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    compile::ProductOutcome,
    config::{Job, SummaryProduct},
    export::{save_summary, write_raster, GeoTransform, GridRecord},
    grid::AxisOrder,
    season::{product_prefix, SeasonClassifier},
    store::{read_series, TimeSeries},
    summary::{period_label, summarize_season, SeasonSummary, SummaryRequest},
};

use super::{ensure_output_dir, isolate, Report};

/// Everything a product's seasons share.
struct Inputs {
    historical: TimeSeries,
    future: TimeSeries,
    request: SummaryRequest,
    transform: GeoTransform,
}

pub fn summarize(job_path: &Path) -> Result<Report> {
    let job = Job::load(job_path)?;
    ensure_output_dir(&job.output_dir)?;
    let classifier = SeasonClassifier::default();

    let mut report = Report::new();
    for product in &job.summary {
        let inputs = match load_inputs(product) {
            Ok(inputs) => inputs,
            Err(e) => {
                report.push(isolate(&product.label, || Err(e)));
                continue;
            }
        };
        report.extend(summarize_product(
            &classifier,
            product,
            &inputs,
            &job.output_dir,
        ));
    }

    Ok(report)
}

fn load_inputs(product: &SummaryProduct) -> Result<Inputs> {
    let request = product.request()?;
    let mut historical = load_period(&product.historical, &product.variable, product.axis_order)?;
    let mut future = load_period(&product.future, &product.variable, product.axis_order)?;

    if let Some(pair) = &product.pair {
        let paired = load_period(&pair.historical, &pair.variable, product.axis_order)?;
        historical = historical.mean_with(&paired, &pair.name)?;
        let paired = load_period(&pair.future, &pair.variable, product.axis_order)?;
        future = future.mean_with(&paired, &pair.name)?;
    }

    let transform = match product.geotransform {
        Some(transform) => transform,
        None => {
            let transform = GeoTransform::from_coords(&historical.lat, &historical.lon)?;
            if request.flip {
                transform.flipped(historical.lat.len())
            } else {
                transform
            }
        }
    };

    Ok(Inputs {
        historical,
        future,
        request,
        transform,
    })
}

/// Reads each store and joins them in time.
fn load_period(paths: &[PathBuf], variable: &str, axis_order: AxisOrder) -> Result<TimeSeries> {
    let parts = paths
        .iter()
        .map(|path| {
            read_series(path, variable, axis_order)
                .with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    TimeSeries::concat(parts).with_context(|| format!("failed to join the `{variable}` stores"))
}

fn summarize_product(
    classifier: &SeasonClassifier,
    product: &SummaryProduct,
    inputs: &Inputs,
    output_dir: &Path,
) -> Report {
    let variable = product.output_variable();
    let mut summaries = Vec::new();

    let mut report: Report = product
        .seasons
        .iter()
        .map(|&season| {
            let prefix = product_prefix(&product.label, season, variable);
            isolate(&prefix, || {
                let summary = summarize_season(
                    classifier,
                    &inputs.historical,
                    &inputs.future,
                    season,
                    &inputs.request,
                )?;
                write_season_rasters(&summary, &prefix, inputs, output_dir)?;
                summaries.push(summary);

                Ok(ProductOutcome::Created)
            })
        })
        .collect();

    if product.table && !summaries.is_empty() {
        let name = format!("{}_{}_summary", product.label, variable);
        let outcome = isolate(&name, || {
            write_table(&summaries, variable, inputs, &output_dir.join(format!("{name}.parquet")))
        });
        report.push(outcome);
    }

    report
}

/// Writes the historical, future and change rasters of one season.
fn write_season_rasters(
    summary: &SeasonSummary,
    prefix: &str,
    inputs: &Inputs,
    output_dir: &Path,
) -> Result<()> {
    let request = &inputs.request;
    let rasters = [
        (period_label(&request.historical_years).to_string(), &summary.historical),
        (period_label(&request.future_years).to_string(), &summary.future),
        (request.change.suffix().to_string(), &summary.change),
    ];

    for (suffix, grid) in rasters {
        let path = output_dir.join(format!("{prefix}_{suffix}.tif"));
        write_raster(&path, grid.view(), &inputs.transform)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "raster written");
    }

    Ok(())
}

fn write_table(
    summaries: &[SeasonSummary],
    variable: &str,
    inputs: &Inputs,
    path: &Path,
) -> Result<ProductOutcome> {
    let request = &inputs.request;
    let historical = period_label(&request.historical_years).to_string();
    let future = period_label(&request.future_years).to_string();

    let records: Vec<GridRecord> = summaries
        .iter()
        .flat_map(|summary| {
            [
                (historical.clone(), &summary.historical),
                (future.clone(), &summary.future),
                (request.change.suffix().to_string(), &summary.change),
            ]
            .map(|(period, grid)| GridRecord {
                product: variable,
                season: summary.season,
                period,
                grid: grid.view(),
            })
        })
        .collect();

    // Flipped grids run their rows in reverse latitude order.
    let mut lat = inputs.historical.lat.clone();
    if request.flip {
        lat.reverse();
    }

    let rows = save_summary(&records, &lat, &inputs.historical.lon, path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), rows, "summary table written");

    Ok(ProductOutcome::Created)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use std::fs;

    use chrono::{Datelike, NaiveDate};
    use ndarray::Array3;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        export::read_raster,
        store::{ArrowStore, SeriesStore, StoreHeader, StoreOptions},
        time_coord::TimeEncoding,
    };

    /// Monthly store whose value is the month number times `scale`.
    fn write_store(path: &Path, variable: &str, years: std::ops::RangeInclusive<i32>, scale: f32) {
        let encoding = TimeEncoding::default();
        let dates: Vec<_> = years
            .flat_map(|y| (1..=12).map(move |m| NaiveDate::from_ymd_opt(y, m, 15).unwrap()))
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
            .collect();
        let times: Vec<f64> = dates.iter().map(|d| encoding.encode(*d)).collect();
        let values = Array3::from_shape_fn((dates.len(), 2, 2), |(t, _, _)| {
            dates[t].month() as f32 * scale
        });

        let series =
            TimeSeries::new(variable, encoding, times, vec![40.0, 40.5], vec![-105.0, -104.5], values)
                .unwrap();
        let options = StoreOptions {
            variable: variable.to_string(),
            ..StoreOptions::default()
        };
        let mut store = ArrowStore::create(path, &StoreHeader::for_series(options, &series)).unwrap();
        store.append(series.values.view(), &series.times).unwrap();
        store.finish().unwrap();
    }

    #[test]
    fn should_write_three_rasters_per_season() {
        let dir = tempdir().unwrap();
        write_store(&dir.path().join("pr_hist.arrows"), "pr", 1970..=1975, 1.0);
        write_store(&dir.path().join("pr_rcp85.arrows"), "pr", 2040..=2045, 2.0);

        let job = dir.path().join("job.toml");
        fs::write(
            &job,
            r#"
            output_dir = "out"

            [[summary]]
            label = "colorado"
            variable = "pr"
            historical = ["pr_hist.arrows"]
            future = ["pr_rcp85.arrows"]
            historical_years = [1972, 1973]
            future_years = [2042, 2043]
            reduce = "sum"
            table = true

            [[summary]]
            label = "broken"
            variable = "pr"
            historical = ["no_such_store.arrows"]
            future = ["pr_rcp85.arrows"]
            historical_years = [1972, 1973]
            future_years = [2042, 2043]
            reduce = "sum"
            "#,
        )
        .unwrap();

        let report = summarize(&job).unwrap();
        // Five seasons and a table, then the unreadable product.
        assert_eq!(report.len(), 7);
        assert!(report[..6].iter().all(|(_, o)| *o == ProductOutcome::Created));
        assert_eq!(report[6].0, "broken");
        assert!(report[6].1.is_failure());

        let out = dir.path().join("out");
        for suffix in ["1972", "2042", "pctchange"] {
            assert!(out.join(format!("colorado_winter_pr_{suffix}.tif")).exists());
        }
        assert!(out.join("colorado_pr_summary.parquet").exists());

        let (change, transform) = read_raster(&out.join("colorado_summer_pr_pctchange.tif"), false).unwrap();
        assert!((change[[0, 0]] - 100.0).abs() < 1e-3);
        assert_eq!(transform.unwrap().origin_x, -105.25);

        let (historical, _) = read_raster(&out.join("colorado_summer_pr_1972.tif"), false).unwrap();
        assert_eq!(historical[[1, 1]], 21.0);
    }
}
