//! netCDF-4 classic stores and source chunks, behind the `netcdf` feature.

use std::path::Path;

use ndarray::{Array3, ArrayView3};
use netcdf::{FileMut, Options, Variable};
use tracing::{debug, warn};

use crate::{
    error::{ClimateError, Result},
    grid::{ensure_same_shape, AxisOrder},
    time_coord::{TimeEncoding, DEFAULT_CALENDAR, DEFAULT_TIME_UNITS},
};

use super::{SeriesStore, StoreHeader, TimeSeries};

pub struct NetcdfStore {
    file: FileMut,
    variable: String,
    time_name: String,
    grid_shape: (usize, usize),
    len: usize,
    last_time: Option<f64>,
}

impl SeriesStore for NetcdfStore {
    fn create(path: &Path, header: &StoreHeader) -> Result<Self> {
        let options = &header.options;
        let (time_name, y_name, x_name) = (
            options.time_name.as_str(),
            options.y_name.as_str(),
            options.x_name.as_str(),
        );
        let (nlat, nlon) = header.grid_shape();

        let mut file = netcdf::create_with(
            path,
            Options::NETCDF4 | Options::CLASSIC | Options::NOCLOBBER,
        )?;

        file.add_unlimited_dimension(time_name)?;
        file.add_dimension(y_name, nlat)?;
        file.add_dimension(x_name, nlon)?;

        {
            let mut time = file.add_variable::<f64>(time_name, &[time_name])?;
            time.put_attribute("units", header.encoding.units())?;
            time.put_attribute("calendar", header.encoding.calendar().as_str())?;
        }
        {
            let lat: Vec<f32> = header.lat.iter().map(|v| *v as f32).collect();
            let mut var = file.add_variable::<f32>(y_name, &[y_name])?;
            var.put_values(&lat, ..)?;
        }
        {
            let lon: Vec<f32> = header.lon.iter().map(|v| *v as f32).collect();
            let mut var = file.add_variable::<f32>(x_name, &[x_name])?;
            var.put_values(&lon, ..)?;
        }
        file.add_variable::<f32>(&options.variable, &[time_name, y_name, x_name])?;

        file.add_attribute("description", options.description.as_str())?;
        file.add_attribute("history", header.history.as_str())?;
        file.sync()?;

        debug!(path = %path.display(), variable = %options.variable, "created netcdf store");
        Ok(NetcdfStore {
            file,
            variable: options.variable.clone(),
            time_name: options.time_name.clone(),
            grid_shape: (nlat, nlon),
            len: 0,
            last_time: None,
        })
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

        let start = self.len;
        let end = start + steps;
        let flat: Vec<f32> = values.iter().copied().collect();

        self.file
            .variable_mut(&self.variable)
            .ok_or_else(|| ClimateError::MissingVariable(self.variable.clone()))?
            .put_values(&flat, (start..end, .., ..))?;
        self.file
            .variable_mut(&self.time_name)
            .ok_or_else(|| ClimateError::MissingVariable(self.time_name.clone()))?
            .put_values(times, [start..end])?;
        self.sync()?;

        self.len = end;
        if let Some(&last) = times.last() {
            self.last_time = Some(last);
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync()?;
        Ok(())
    }

    fn finish(self) -> Result<()> {
        self.file.close()?;
        Ok(())
    }
}

fn string_attribute(var: &Variable, name: &str) -> Result<Option<String>> {
    match var.attribute_value(name).transpose()? {
        Some(value) => Ok(Some(String::try_from(value)?)),
        None => Ok(None),
    }
}

fn number_attribute(var: &Variable, name: &str) -> Result<Option<f64>> {
    match var.attribute_value(name).transpose()? {
        Some(value) => Ok(Some(f64::try_from(value)?)),
        None => Ok(None),
    }
}

fn coordinate(file: &netcdf::File, name: &str) -> Result<Vec<f64>> {
    file.variable(name)
        .ok_or_else(|| ClimateError::MissingVariable(name.to_string()))?
        .get_values::<f64, _>(..)
        .map_err(ClimateError::from)
}

/// Reads `variable` from a store or a source chunk. Fill and missing values
/// become NaN and `scale_factor`/`add_offset` are applied.
pub fn read_series(path: &Path, variable: &str, axis_order: AxisOrder) -> Result<TimeSeries> {
    let file = netcdf::open(path)?;
    let var = file
        .variable(variable)
        .ok_or_else(|| ClimateError::MissingVariable(variable.to_string()))?;

    let dims = var.dimensions();
    if dims.len() != 3 {
        return Err(ClimateError::MalformedStore(format!(
            "`{variable}` has {} dimensions, expected 3",
            dims.len()
        )));
    }
    let (time_dim, lat_dim, lon_dim) = match axis_order {
        AxisOrder::TimeLatLon => (&dims[0], &dims[1], &dims[2]),
        AxisOrder::LonLatTime => (&dims[2], &dims[1], &dims[0]),
    };

    let time_var = file
        .variable(&time_dim.name())
        .ok_or_else(|| ClimateError::MissingVariable(time_dim.name()))?;
    let units = string_attribute(&time_var, "units")?.unwrap_or_else(|| {
        warn!(path = %path.display(), "time has no units, assuming {DEFAULT_TIME_UNITS}");
        DEFAULT_TIME_UNITS.to_string()
    });
    let calendar =
        string_attribute(&time_var, "calendar")?.unwrap_or_else(|| DEFAULT_CALENDAR.to_string());
    let encoding = TimeEncoding::parse(&units, &calendar)?;
    let times = time_var.get_values::<f64, _>(..)?;

    let lat = coordinate(&file, &lat_dim.name())?;
    let lon = coordinate(&file, &lon_dim.name())?;

    let raw = var.get_values::<f32, _>(..)?;
    let values = Array3::from_shape_vec((dims[0].len(), dims[1].len(), dims[2].len()), raw)?;
    let mut values = axis_order.to_time_lat_lon(values);

    let fill = number_attribute(&var, "_FillValue")?;
    let missing = number_attribute(&var, "missing_value")?;
    let scale = number_attribute(&var, "scale_factor")?.unwrap_or(1.0) as f32;
    let offset = number_attribute(&var, "add_offset")?.unwrap_or(0.0) as f32;

    let masked = |v: f32| {
        fill.is_some_and(|f| v == f as f32) || missing.is_some_and(|m| v == m as f32)
    };
    values.mapv_inplace(|v| if masked(v) { f32::NAN } else { v * scale + offset });

    TimeSeries::new(variable, encoding, times, lat, lon, values)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use ndarray::Array3;
    use tempfile::tempdir;

    use super::*;
    use crate::store::StoreOptions;

    #[test]
    fn should_append_along_unlimited_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasmax.nc");
        let header = StoreHeader::new(
            StoreOptions {
                variable: "tasmax".to_string(),
                ..StoreOptions::default()
            },
            TimeEncoding::default(),
            vec![40.0, 40.5],
            vec![-105.0, -104.5, -104.0],
        );

        let mut store = NetcdfStore::create(&path, &header).unwrap();
        store
            .append(Array3::from_elem((2, 2, 3), 1.5f32).view(), &[10.0, 11.0])
            .unwrap();
        store
            .append(Array3::from_elem((1, 2, 3), 2.5f32).view(), &[12.0])
            .unwrap();
        store.finish().unwrap();

        let series = read_series(&path, "tasmax", AxisOrder::TimeLatLon).unwrap();
        assert_eq!(series.times, vec![10.0, 11.0, 12.0]);
        assert_eq!(series.lon, vec![-105.0, -104.5, -104.0]);
        assert_eq!(series.values[[2, 1, 2]], 2.5);
        assert!(NetcdfStore::create(&path, &header).is_err());
    }
}
