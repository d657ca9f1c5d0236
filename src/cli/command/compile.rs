use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::{
    cli::create_progress_bar,
    compile::{Opened, ProductOutcome, TimeSeriesCompiler},
    config::{CompileProduct, Job},
    source::load_chunk,
    store::{ArrowStore, SeriesStore, StoreFormat, StoreHeader, TimeSeries},
};

use super::{ensure_output_dir, isolate, Report};

pub fn compile(job_path: &Path) -> Result<Report> {
    let job = Job::load(job_path)?;
    ensure_output_dir(&job.output_dir)?;

    Ok(job
        .compile
        .iter()
        .map(|product| isolate(&product.name, || compile_product(product, &job.output_dir)))
        .collect())
}

fn compile_product(product: &CompileProduct, output_dir: &Path) -> Result<ProductOutcome> {
    let path = product.output_path(output_dir);
    // Checked before any chunk is read; the compiler checks again on creation.
    if path.exists() {
        info!(path = %path.display(), "output exists, skipping");
        return Ok(ProductOutcome::Skipped);
    }

    let chunks = product.chunk_paths()?;
    let pb = create_progress_bar(chunks.len() as u64, format!("Compiling {}", product.name));

    let first = read_chunk(&chunks[0], product)?;
    let header = StoreHeader::for_series(product.store.clone(), &first);

    match StoreFormat::from_path(&path)? {
        StoreFormat::Arrow => append_all::<ArrowStore>(&path, &header, product, first, &chunks, &pb),
        StoreFormat::NetCdf => compile_netcdf(&path, &header, product, first, &chunks, &pb),
    }
}

#[cfg(feature = "netcdf")]
fn compile_netcdf(
    path: &Path,
    header: &StoreHeader,
    product: &CompileProduct,
    first: TimeSeries,
    chunks: &[PathBuf],
    pb: &ProgressBar,
) -> Result<ProductOutcome> {
    append_all::<crate::store::NetcdfStore>(path, header, product, first, chunks, pb)
}

#[cfg(not(feature = "netcdf"))]
fn compile_netcdf(
    path: &Path,
    _header: &StoreHeader,
    _product: &CompileProduct,
    _first: TimeSeries,
    _chunks: &[PathBuf],
    _pb: &ProgressBar,
) -> Result<ProductOutcome> {
    anyhow::bail!(
        "cannot write {}: built without the `netcdf` feature",
        path.display()
    )
}

fn read_chunk(path: &Path, product: &CompileProduct) -> Result<TimeSeries> {
    load_chunk(path, &product.source)
        .with_context(|| format!("failed to read chunk {}", path.display()))
}

/// Appends `first`, already read from `chunks[0]`, then every other chunk.
fn append_all<S: SeriesStore>(
    path: &Path,
    header: &StoreHeader,
    product: &CompileProduct,
    first: TimeSeries,
    chunks: &[PathBuf],
    pb: &ProgressBar,
) -> Result<ProductOutcome> {
    let mut compiler = match TimeSeriesCompiler::<S>::open_or_create(path, header, product.stepping)
        .with_context(|| format!("failed to create {}", path.display()))?
    {
        Opened::Created(compiler) => compiler,
        Opened::Skipped => return Ok(ProductOutcome::Skipped),
    };

    let mut chunk = first;
    for (i, chunk_path) in chunks.iter().enumerate() {
        if i > 0 {
            chunk = read_chunk(chunk_path, product)?;
        }
        compiler
            .append_chunk(&chunk)
            .with_context(|| format!("failed to append chunk {}", chunk_path.display()))?;
        debug!(
            chunk = %chunk_path.display(),
            state = ?compiler.state(),
            steps = compiler.len(),
            "chunk appended"
        );
        pb.inc(1);
    }

    let steps = compiler.finalize()?;
    pb.finish_with_message(format!("{} compiled ({steps} steps)", product.name));

    Ok(ProductOutcome::Created)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use std::fs;

    use ndarray::Array3;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        grid::AxisOrder,
        store::{read_series, StoreOptions},
        time_coord::TimeEncoding,
    };

    /// Writes a finished single-chunk store to use as a source chunk.
    fn write_chunk(path: &Path, times: Vec<f64>, fill: f32) {
        let steps = times.len();
        let series = TimeSeries::new(
            "tasmax",
            TimeEncoding::default(),
            times,
            vec![40.0, 41.0],
            vec![255.0, 256.0],
            Array3::from_elem((steps, 2, 2), fill),
        )
        .unwrap();
        let options = StoreOptions {
            variable: "tasmax".to_string(),
            ..StoreOptions::default()
        };

        let mut store = ArrowStore::create(path, &StoreHeader::for_series(options, &series)).unwrap();
        store.append(series.values.view(), &series.times).unwrap();
        store.finish().unwrap();
    }

    fn write_job(dir: &Path) -> PathBuf {
        fs::create_dir(dir.join("raw")).unwrap();
        write_chunk(&dir.join("raw/tasmax_2006.arrows"), vec![20454.0, 20455.0], 290.0);
        write_chunk(&dir.join("raw/tasmax_2007.arrows"), vec![0.0, 1.0, 2.0], 300.0);

        let job = dir.join("job.toml");
        fs::write(
            &job,
            r#"
            output_dir = "out"

            [[compile]]
            name = "tasmax"
            chunk_dir = "raw"
            chunk_suffix = ".arrows"
            source = { variable = "tasmax", lon_offset = -360.0, transform = "kelvin_to_celsius" }
            store = { variable = "tasmax" }

            [[compile]]
            name = "missing"
            chunks = ["raw/nothing_here.arrows"]
            source = { variable = "tasmax" }
            "#,
        )
        .unwrap();

        job
    }

    #[test]
    fn should_compile_and_isolate_failures() {
        let dir = tempdir().unwrap();
        let job = write_job(dir.path());

        let report = compile(&job).unwrap();
        assert_eq!(report[0], ("tasmax".to_string(), ProductOutcome::Created));
        assert!(report[1].1.is_failure());

        let series = read_series(
            &dir.path().join("out/tasmax.arrows"),
            "tasmax",
            AxisOrder::TimeLatLon,
        )
        .unwrap();
        assert_eq!(series.times, vec![20454.0, 20455.0, 20456.0, 20457.0, 20458.0]);
        assert_eq!(series.lon, vec![-105.0, -104.0]);
        assert!((series.values[[0, 0, 0]] - 16.85).abs() < 1e-3);
        assert!((series.values[[4, 1, 1]] - 26.85).abs() < 1e-3);

        let again = compile(&job).unwrap();
        assert_eq!(again[0].1, ProductOutcome::Skipped);
    }
}
