//! Saves seasonal summary grids as a long _parquet_ table, one row per cell.

use std::{fs::File, path::Path, sync::Arc};

use arrow::{
    array::{ArrayRef, Float32Array, Float64Array, RecordBatch, StringArray},
    datatypes::{DataType, Field, Schema},
};
use ndarray::ArrayView2;
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};

use crate::{
    cli::create_progress_bar,
    error::{ClimateError, Result},
    grid::ensure_same_shape,
    season::SeasonBucket,
};

const ROWS_PER_BATCH: usize = 100_000;

/// One grid of the table. Rows follow `lat`, columns follow `lon`.
pub struct GridRecord<'a> {
    pub product: &'a str,
    pub season: SeasonBucket,
    pub period: String,
    pub grid: ArrayView2<'a, f32>,
}

/// Writes every cell of `records`, NaN cells as nulls. Returns the row count.
pub fn save_summary(
    records: &[GridRecord],
    lat: &[f64],
    lon: &[f64],
    file_path: &Path,
) -> Result<usize> {
    for record in records {
        ensure_same_shape((lat.len(), lon.len()), record.grid.dim())?;
    }

    let file = File::create(file_path)?;
    let schema = Arc::new(Schema::new(vec![
        Field::new("product", DataType::Utf8, false),
        Field::new("season", DataType::Utf8, false),
        Field::new("period", DataType::Utf8, false),
        Field::new("lat", DataType::Float64, false),
        Field::new("lon", DataType::Float64, false),
        Field::new("value", DataType::Float32, true),
    ]));
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let cells = lat.len() * lon.len();
    let total_rows = records.len() * cells;
    let pb = create_progress_bar(total_rows as u64, "Writing summary table".to_string());

    let mut rows = records.iter().flat_map(|record| {
        record.grid.indexed_iter().map(move |((i, j), value)| {
            (record, lat[i], lon[j], (!value.is_nan()).then_some(*value))
        })
    });

    let mut written = 0;
    while written < total_rows {
        let batch_size = ROWS_PER_BATCH.min(total_rows - written);

        let mut products = Vec::with_capacity(batch_size);
        let mut seasons = Vec::with_capacity(batch_size);
        let mut periods = Vec::with_capacity(batch_size);
        let mut lats = Vec::with_capacity(batch_size);
        let mut lons = Vec::with_capacity(batch_size);
        let mut values = Vec::with_capacity(batch_size);

        for (record, y, x, value) in rows.by_ref().take(batch_size) {
            products.push(record.product);
            seasons.push(record.season.label());
            periods.push(record.period.as_str());
            lats.push(y);
            lons.push(x);
            values.push(value);
        }
        if products.is_empty() {
            return Err(ClimateError::InvalidState("summary rows ended early"));
        }

        let rows_in_batch = products.len();
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(products)),
            Arc::new(StringArray::from(seasons)),
            Arc::new(StringArray::from(periods)),
            Arc::new(Float64Array::from(lats)),
            Arc::new(Float64Array::from(lons)),
            Arc::new(Float32Array::from(values)),
        ];
        writer.write(&RecordBatch::try_new(schema.clone(), columns)?)?;

        written += rows_in_batch;
        pb.inc(rows_in_batch as u64);
    }

    pb.finish_with_message("Finished writing summary table");
    writer.close()?;

    Ok(written)
}

// -- Tests -------------------------------------------------------------------
