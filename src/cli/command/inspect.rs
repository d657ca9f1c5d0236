use std::path::Path;

use anyhow::{Context, Result};

use crate::{cli::create_spinner, export::read_raster, grid::AxisOrder, store::read_series};

/// Describes the store or GeoTIFF at `path`: for a store its variable, time
/// encoding, length, grid and time span, for a raster its shape and placement.
pub fn inspect(path: &Path, variable: &str) -> Result<String> {
    let spinner = create_spinner(format!("Reading {}", path.display()));
    let description = if is_raster(path) {
        describe_raster(path)
    } else {
        describe_store(path, variable)
    };
    spinner.finish_and_clear();

    description.with_context(|| format!("failed to read {}", path.display()))
}

fn is_raster(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}

fn describe_store(path: &Path, variable: &str) -> Result<String> {
    let series = read_series(path, variable, AxisOrder::TimeLatLon)?;

    let (rows, cols) = series.grid_shape();
    let mut lines = vec![
        format!("variable: {}", series.variable),
        format!(
            "time: {} ({})",
            series.encoding.units(),
            series.encoding.calendar().as_str()
        ),
        format!("steps: {}", series.len()),
        format!("grid: {rows} x {cols}"),
    ];

    if series.is_empty() {
        lines.push("span: empty".to_string());
    } else {
        let first = series.encoding.decode(series.times[0])?;
        let last = series.encoding.decode(series.times[series.len() - 1])?;
        lines.push(format!("span: {first} to {last}"));
    }

    Ok(lines.join("\n"))
}

fn describe_raster(path: &Path) -> Result<String> {
    let (grid, transform) = read_raster(path, false)?;
    let (rows, cols) = grid.dim();
    let nodata = grid.iter().filter(|v| v.is_nan()).count();

    let mut lines = vec![
        format!("grid: {rows} x {cols}"),
        format!("nodata cells: {nodata}"),
    ];
    match transform {
        Some(t) => lines.push(format!(
            "origin: ({}, {}), cell: {} x {}",
            t.origin_x, t.origin_y, t.pixel_width, t.pixel_height
        )),
        None => lines.push("origin: unknown".to_string()),
    }

    Ok(lines.join("\n"))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use ndarray::{array, Array3};
    use tempfile::tempdir;

    use super::*;
    use crate::{
        export::{write_raster, GeoTransform},
        store::{ArrowStore, SeriesStore, StoreHeader, StoreOptions, TimeSeries},
        time_coord::TimeEncoding,
    };

    #[test]
    fn should_describe_a_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasmin.arrows");
        let series = TimeSeries::new(
            "tasmin",
            TimeEncoding::default(),
            vec![0.0, 1.0, 2.0],
            vec![40.0, 41.0],
            vec![-105.0, -104.0, -103.0],
            Array3::zeros((3, 2, 3)),
        )
        .unwrap();
        let options = StoreOptions {
            variable: "tasmin".to_string(),
            ..StoreOptions::default()
        };
        let mut store = ArrowStore::create(&path, &StoreHeader::for_series(options, &series)).unwrap();
        store.append(series.values.view(), &series.times).unwrap();
        store.finish().unwrap();

        let report = inspect(&path, "tasmin").unwrap();
        assert!(report.contains("steps: 3"));
        assert!(report.contains("grid: 2 x 3"));
        assert!(report.contains("span: 1950-01-01 00:00:00 to 1950-01-03 00:00:00"));

        assert!(inspect(&path, "tasmax").is_err());
    }

    #[test]
    fn should_describe_a_raster() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("colorado_winter_pr_pctchange.tif");
        let grid = array![[1.0f32, f32::NAN, 3.0], [4.0, 5.0, 6.0]];
        let transform = GeoTransform {
            origin_x: -109.0,
            origin_y: 41.0,
            pixel_width: 0.5,
            pixel_height: -0.5,
        };
        write_raster(&path, grid.view(), &transform).unwrap();

        let report = inspect(&path, "var").unwrap();
        assert!(report.contains("grid: 2 x 3"));
        assert!(report.contains("nodata cells: 1"));
        assert!(report.contains("origin: (-109, 41), cell: 0.5 x -0.5"));
    }
}
