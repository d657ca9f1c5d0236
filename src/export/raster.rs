//! Single-band Float32 GeoTIFFs in WGS84.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use ndarray::{Array2, ArrayView2};
use serde::Deserialize;
use tiff::{
    decoder::{Decoder, DecodingResult},
    encoder::{colortype::Gray32Float, TiffEncoder},
    tags::Tag,
};
use tracing::debug;

use crate::{
    error::{ClimateError, Result},
    grid::flip_latitude,
};

/// GeoKey directory for a geographic WGS84 raster: version 1.1.0 with three
/// keys (model type geographic, raster is area, EPSG:4326).
const WGS84_GEO_KEYS: [u16; 16] = [
    1, 1, 0, 3, //
    1024, 0, 1, 2, //
    1025, 0, 1, 1, //
    2048, 0, 1, 4326,
];

/// Affine placement of a north-aligned raster: the outer corner of cell (0, 0)
/// and the cell size. `pixel_height` is negative when row 0 is the north edge.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Placement of a grid whose row `i` sits at `lat[i]` and column `j` at
    /// `lon[j]`, coordinates being cell centres.
    pub fn from_coords(lat: &[f64], lon: &[f64]) -> Result<Self> {
        let (&[lat0, lat1, ..], &[lon0, lon1, ..]) = (lat, lon) else {
            return Err(ClimateError::InvalidState(
                "a geotransform needs at least two cells along each axis",
            ));
        };

        let pixel_width = lon1 - lon0;
        let pixel_height = lat1 - lat0;
        Ok(GeoTransform {
            origin_x: lon0 - pixel_width / 2.0,
            origin_y: lat0 - pixel_height / 2.0,
            pixel_width,
            pixel_height,
        })
    }

    /// The same placement after the rows have been reversed.
    pub fn flipped(&self, rows: usize) -> Self {
        GeoTransform {
            origin_y: self.origin_y + self.pixel_height * rows as f64,
            pixel_height: -self.pixel_height,
            ..*self
        }
    }

    fn model_transformation(&self) -> [f64; 16] {
        [
            self.pixel_width, 0.0, 0.0, self.origin_x, //
            0.0, self.pixel_height, 0.0, self.origin_y, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

pub fn write_raster(path: &Path, grid: ArrayView2<f32>, transform: &GeoTransform) -> Result<()> {
    let (rows, cols) = grid.dim();
    let data: Vec<f32> = grid.iter().copied().collect();

    let mut tiff = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    let mut image = tiff.new_image::<Gray32Float>(cols as u32, rows as u32)?;
    image
        .encoder()
        .write_tag(Tag::ModelTransformationTag, &transform.model_transformation()[..])?;
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, &WGS84_GEO_KEYS[..])?;
    image.encoder().write_tag(Tag::GdalNodata, "nan")?;
    image.write_data(&data)?;

    debug!(path = %path.display(), rows, cols, "wrote raster");
    Ok(())
}

/// Reads band 1 of a Float32 raster, with rows reversed when `flip` is set.
pub fn read_raster(path: &Path, flip: bool) -> Result<(Array2<f32>, Option<GeoTransform>)> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (cols, rows) = decoder.dimensions()?;

    let transform = match decoder.find_tag(Tag::ModelTransformationTag)? {
        Some(value) => {
            let m = value.into_f64_vec()?;
            (m.len() == 16).then(|| GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: m[5],
            })
        }
        None => None,
    };

    let data = match decoder.read_image()? {
        DecodingResult::F32(data) => data,
        _ => {
            return Err(ClimateError::MalformedStore(format!(
                "{} is not a Float32 raster",
                path.display()
            )))
        }
    };
    let grid = Array2::from_shape_vec((rows as usize, cols as usize), data)?;

    if flip {
        let transform = transform.map(|t| t.flipped(rows as usize));
        Ok((flip_latitude(grid.view()), transform))
    } else {
        Ok((grid, transform))
    }
}

// -- Tests -------------------------------------------------------------------
