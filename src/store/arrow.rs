//! Compiled series as an Arrow IPC stream, one record batch per appended chunk.
//!
//! The grid coordinates and time encoding live in the schema metadata. Every
//! append is flushed and synced, and the reader treats a stream that ends
//! without its end-of-stream marker as complete, so an interrupted compile
//! leaves a readable prefix.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, ErrorKind},
    path::Path,
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, FixedSizeListArray, Float32Array, Float64Array, RecordBatch},
    datatypes::{DataType, Field, FieldRef, Schema, SchemaRef},
    error::ArrowError,
    ipc::{reader::StreamReader, writer::StreamWriter},
};
use ndarray::{Array3, ArrayView3};
use tracing::{debug, warn};

use crate::{
    error::{ClimateError, Result},
    grid::ensure_same_shape,
    time_coord::TimeEncoding,
};

use super::{SeriesStore, StoreHeader, TimeSeries};

const META_VARIABLE: &str = "variable";
const META_TIME_NAME: &str = "time_name";
const META_X_NAME: &str = "x_name";
const META_Y_NAME: &str = "y_name";
const META_UNITS: &str = "units";
const META_CALENDAR: &str = "calendar";
const META_DESCRIPTION: &str = "description";
const META_HISTORY: &str = "history";
const META_LAT: &str = "lat";
const META_LON: &str = "lon";

pub struct ArrowStore {
    writer: StreamWriter<BufWriter<File>>,
    schema: SchemaRef,
    item: FieldRef,
    grid_shape: (usize, usize),
    len: usize,
    last_time: Option<f64>,
}

fn schema_for(header: &StoreHeader) -> Result<(SchemaRef, FieldRef)> {
    let (nlat, nlon) = header.grid_shape();
    let cells = i32::try_from(nlat * nlon)
        .map_err(|_| ClimateError::MalformedStore(format!("grid of {nlat}x{nlon} is too large")))?;
    let item: FieldRef = Arc::new(Field::new("item", DataType::Float32, true));

    let options = &header.options;
    let metadata = HashMap::from([
        (META_VARIABLE.to_string(), options.variable.clone()),
        (META_TIME_NAME.to_string(), options.time_name.clone()),
        (META_X_NAME.to_string(), options.x_name.clone()),
        (META_Y_NAME.to_string(), options.y_name.clone()),
        (META_UNITS.to_string(), header.encoding.units()),
        (
            META_CALENDAR.to_string(),
            header.encoding.calendar().as_str().to_string(),
        ),
        (META_DESCRIPTION.to_string(), options.description.clone()),
        (META_HISTORY.to_string(), header.history.clone()),
        (META_LAT.to_string(), serde_json::to_string(&header.lat)?),
        (META_LON.to_string(), serde_json::to_string(&header.lon)?),
    ]);

    let schema = Schema::new(vec![
        Field::new(&options.time_name, DataType::Float64, false),
        Field::new(
            &options.variable,
            DataType::FixedSizeList(item.clone(), cells),
            false,
        ),
    ])
    .with_metadata(metadata);

    Ok((Arc::new(schema), item))
}

impl SeriesStore for ArrowStore {
    fn create(path: &Path, header: &StoreHeader) -> Result<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let (schema, item) = schema_for(header)?;
        let writer = StreamWriter::try_new(BufWriter::new(file), &schema)?;

        let mut store = ArrowStore {
            writer,
            schema,
            item,
            grid_shape: header.grid_shape(),
            len: 0,
            last_time: None,
        };
        store.sync()?;

        debug!(path = %path.display(), variable = %header.options.variable, "created arrow store");
        Ok(store)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn last_time(&self) -> Option<f64> {
        self.last_time
    }

    fn append(&mut self, values: ArrayView3<f32>, times: &[f64]) -> Result<()> {
        let (steps, nlat, nlon) = values.dim();
        if steps != times.len() {
            return Err(ClimateError::TimeLengthMismatch {
                times: times.len(),
                steps,
            });
        }
        ensure_same_shape(self.grid_shape, (nlat, nlon))?;

        let cells = (nlat * nlon) as i32;
        let items = Float32Array::from_iter_values(values.iter().copied());
        let grids = FixedSizeListArray::try_new(self.item.clone(), cells, Arc::new(items), None)?;
        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(Float64Array::from(times.to_vec())) as ArrayRef,
                Arc::new(grids) as ArrayRef,
            ],
        )?;

        self.writer.write(&batch)?;
        self.sync()?;

        self.len += steps;
        if let Some(&last) = times.last() {
            self.last_time = Some(last);
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().get_ref().sync_data()?;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.writer.finish()?;
        self.sync()
    }
}

/// Reads every complete batch of the store at `path`.
pub fn read_series(path: &Path, variable: &str) -> Result<TimeSeries> {
    let reader = StreamReader::try_new(BufReader::new(File::open(path)?), None)?;
    let schema = reader.schema();
    let metadata = schema.metadata();
    let meta = |key: &str| {
        metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ClimateError::MalformedStore(format!("missing `{key}` metadata")))
    };

    if meta(META_VARIABLE)? != variable {
        return Err(ClimateError::MissingVariable(variable.to_string()));
    }
    let time_name = meta(META_TIME_NAME)?.to_string();
    let encoding = TimeEncoding::parse(meta(META_UNITS)?, meta(META_CALENDAR)?)?;
    let lat: Vec<f64> = serde_json::from_str(meta(META_LAT)?)?;
    let lon: Vec<f64> = serde_json::from_str(meta(META_LON)?)?;
    let cells = lat.len() * lon.len();

    let mut times = Vec::new();
    let mut flat = Vec::new();

    for batch in reader {
        // A chunk cut short by a crash ends the stream; the chunks before it were synced.
        let batch = match batch {
            Ok(batch) => batch,
            Err(ArrowError::IoError(_, e)) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(
                    path = %path.display(),
                    steps = times.len(),
                    "store ends inside a chunk, reading up to it"
                );
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let batch_times = batch
            .column_by_name(&time_name)
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
            .ok_or_else(|| ClimateError::MalformedStore(format!("no `{time_name}` column")))?;
        let grids = batch
            .column_by_name(variable)
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| ClimateError::MissingVariable(variable.to_string()))?;
        let items = grids
            .values()
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| ClimateError::MalformedStore("grid items are not float32".to_string()))?;

        if grids.value_length() as usize != cells || items.len() != grids.len() * cells {
            return Err(ClimateError::MalformedStore(format!(
                "batch grids of {} cells on a {}x{} grid",
                grids.value_length(),
                lat.len(),
                lon.len()
            )));
        }

        times.extend_from_slice(batch_times.values());
        flat.extend(items.iter().map(|v| v.unwrap_or(f32::NAN)));
    }

    let values = Array3::from_shape_vec((times.len(), lat.len(), lon.len()), flat)?;
    TimeSeries::new(variable, encoding, times, lat, lon, values)
}

// -- Tests -------------------------------------------------------------------
