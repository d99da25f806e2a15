//! Native multi-page GeoTIFF reading/writing
//!
//! Uses the `tiff` crate. Each band is stored as its own page (IFD); the
//! georeferencing tags live on every page and are read back from the first.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{DataType, GeoTransform, MultiBandRaster, Raster, RasterElement, Window};
use ndarray::{Array2, Array3, ArrayView2};
use num_traits::{NumCast, Zero};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{
    ColorType, Gray16, Gray32, Gray32Float, Gray64Float, Gray8, GrayI16, GrayI32,
};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;

/// Rows per strip on write; windowed reads decode whole strips
const STRIP_ROWS: u32 = 64;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// Metadata of a GeoTIFF without its pixels
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiffHeader {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub data_type: DataType,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
}

/// Read every page of a GeoTIFF file as one band each
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<MultiBandRaster> {
    let file = BufReader::new(File::open(path.as_ref())?);
    decode_geotiff(file)
}

/// Same as [`read_geotiff`] on an in-memory buffer
pub fn read_geotiff_from_buffer(data: &[u8]) -> Result<MultiBandRaster> {
    decode_geotiff(Cursor::new(data))
}

/// Read only the header (dimensions, band count, georeferencing)
pub fn read_geotiff_header<P: AsRef<Path>>(path: P) -> Result<GeoTiffHeader> {
    let file = BufReader::new(File::open(path.as_ref())?);
    let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let (transform, crs, nodata) = read_georeferencing(&mut decoder);
    // The pixel type is only exposed through decoded data
    let data_type = if width == 0 || height == 0 {
        data_type_of(&decoder.read_image()?)?
    } else {
        data_type_of(&decoder.read_chunk(0)?)?
    };

    let mut bands = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        bands += 1;
    }

    Ok(GeoTiffHeader {
        rows: height as usize,
        cols: width as usize,
        bands,
        data_type,
        transform,
        crs,
        nodata,
    })
}

/// Read a single-band GeoTIFF into a typed raster
pub fn read_raster<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    image_to_raster(&read_geotiff(path)?)
}

/// Narrow a one-band image to a typed raster. Values that do not fit `T`
/// become zero.
pub fn image_to_raster<T: RasterElement>(image: &MultiBandRaster) -> Result<Raster<T>> {
    if image.bands() != 1 {
        return Err(Error::UnsupportedDataType(format!(
            "expected a single-band raster, found {} bands",
            image.bands()
        )));
    }

    let fallback = T::zero();
    let data: Array2<T> = image
        .band(0)
        .mapv(|v| NumCast::from(v).unwrap_or(fallback));
    let mut raster = Raster::from_array(data);
    raster.set_transform(*image.transform());
    raster.set_crs(image.crs().cloned());
    raster.set_nodata(image.nodata().and_then(NumCast::from));
    Ok(raster)
}

fn decode_geotiff<R: Read + Seek>(reader: R) -> Result<MultiBandRaster> {
    let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let rows = height as usize;
    let cols = width as usize;
    let (transform, crs, nodata) = read_georeferencing(&mut decoder);

    let mut pages = Vec::new();
    let mut data_type = None;
    loop {
        let (w, h) = decoder.dimensions()?;
        if (w as usize, h as usize) != (cols, rows) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: h as usize,
                ac: w as usize,
            });
        }

        let page = decoder.read_image()?;
        let page_type = data_type_of(&page)?;
        match data_type {
            None => data_type = Some(page_type),
            Some(dt) if dt != page_type => {
                return Err(Error::UnsupportedDataType(format!(
                    "mixed band types {} and {}",
                    dt, page_type
                )))
            }
            Some(_) => {}
        }

        let values = page_to_f64(page);
        if values.len() != rows * cols {
            // Chunky multi-sample pages are not one band per page
            return Err(Error::UnsupportedDataType(
                "only single-sample pages are supported".to_string(),
            ));
        }
        pages.extend(values);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let bands = pages.len() / (rows * cols);
    let data = Array3::from_shape_vec((bands, rows, cols), pages)
        .map_err(|e| Error::Other(e.to_string()))?;

    let mut image = MultiBandRaster::from_array(data, data_type.unwrap_or(DataType::F64));
    image.set_transform(transform);
    image.set_crs(crs);
    image.set_nodata(nodata);
    Ok(image)
}

/// Read a block of every page, georeferenced at the window origin.
///
/// Only the strips (or tiles) that intersect `window` are decoded.
pub fn read_geotiff_window<P: AsRef<Path>>(path: P, window: &Window) -> Result<MultiBandRaster> {
    let file = BufReader::new(File::open(path.as_ref())?);
    decode_geotiff_window(file, window)
}

fn decode_geotiff_window<R: Read + Seek>(reader: R, window: &Window) -> Result<MultiBandRaster> {
    let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let rows = height as usize;
    let cols = width as usize;
    if window.is_empty() || !window.fits(rows, cols) {
        return Err(Error::WindowOutOfBounds {
            window: window.to_string(),
            rows,
            cols,
        });
    }
    let (transform, crs, nodata) = read_georeferencing(&mut decoder);

    let mut values = Vec::with_capacity(window.area());
    let mut data_type = None;
    let mut bands = 0;
    loop {
        let (w, h) = decoder.dimensions()?;
        if (w as usize, h as usize) != (cols, rows) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: h as usize,
                ac: w as usize,
            });
        }
        let page_type = read_page_window(&mut decoder, cols, window, &mut values)?;
        match data_type {
            None => data_type = Some(page_type),
            Some(dt) if dt != page_type => {
                return Err(Error::UnsupportedDataType(format!(
                    "mixed band types {} and {}",
                    dt, page_type
                )))
            }
            Some(_) => {}
        }
        bands += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let data = Array3::from_shape_vec((bands, window.rows, window.cols), values)
        .map_err(|e| Error::Other(e.to_string()))?;
    let mut image = MultiBandRaster::from_array(data, data_type.unwrap_or(DataType::F64));
    image.set_transform(transform.for_window(window));
    image.set_crs(crs);
    image.set_nodata(nodata);
    Ok(image)
}

/// Append the window of the current page to `out`, row-major, decoding
/// the chunks it touches one at a time
fn read_page_window<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    cols: usize,
    window: &Window,
    out: &mut Vec<f64>,
) -> Result<DataType> {
    let start = out.len();
    out.resize(start + window.area(), 0.0);

    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    let (chunk_w, chunk_h) = (chunk_w as usize, chunk_h as usize);
    if chunk_w == 0 || chunk_h == 0 {
        return Err(Error::UnsupportedDataType("empty TIFF chunks".to_string()));
    }
    let across = cols.div_ceil(chunk_w);

    let mut data_type = None;
    for chunk_row in window.row_off / chunk_h..=(window.row_end() - 1) / chunk_h {
        for chunk_col in window.col_off / chunk_w..=(window.col_end() - 1) / chunk_w {
            let index = (chunk_row * across + chunk_col) as u32;
            let (data_w, data_h) = decoder.chunk_data_dimensions(index);
            let (data_w, data_h) = (data_w as usize, data_h as usize);
            let chunk = decoder.read_chunk(index)?;
            data_type = Some(data_type_of(&chunk)?);
            let chunk = page_to_f64(chunk);
            if chunk.len() != data_w * data_h {
                return Err(Error::UnsupportedDataType(
                    "only single-sample pages are supported".to_string(),
                ));
            }

            let (row0, col0) = (chunk_row * chunk_h, chunk_col * chunk_w);
            let Some(overlap) = window.intersect(&Window::new(row0, col0, data_h, data_w)) else {
                continue;
            };
            for r in overlap.row_off..overlap.row_end() {
                let src = (r - row0) * data_w + (overlap.col_off - col0);
                let dst = start + (r - window.row_off) * window.cols + (overlap.col_off - window.col_off);
                out[dst..dst + overlap.cols].copy_from_slice(&chunk[src..src + overlap.cols]);
            }
        }
    }
    data_type.ok_or_else(|| Error::UnsupportedDataType("page has no pixel data".to_string()))
}

fn data_type_of(page: &DecodingResult) -> Result<DataType> {
    match page {
        DecodingResult::U8(_) => Ok(DataType::U8),
        DecodingResult::U16(_) => Ok(DataType::U16),
        DecodingResult::U32(_) => Ok(DataType::U32),
        DecodingResult::I16(_) => Ok(DataType::I16),
        DecodingResult::I32(_) => Ok(DataType::I32),
        DecodingResult::F32(_) => Ok(DataType::F32),
        DecodingResult::F64(_) => Ok(DataType::F64),
        _ => Err(Error::UnsupportedDataType(
            "unsupported TIFF pixel format".to_string(),
        )),
    }
}

fn page_to_f64(page: DecodingResult) -> Vec<f64> {
    match page {
        DecodingResult::U8(buf) => buf.into_iter().map(<f64 as From<u8>>::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(<f64 as From<u16>>::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(<f64 as From<u32>>::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(<f64 as From<i16>>::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(<f64 as From<i32>>::from).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(<f64 as From<f32>>::from).collect(),
        DecodingResult::F64(buf) => buf,
        _ => Vec::new(),
    }
}

/// Transform, CRS and no-data from the current page. Missing tags fall back
/// to an identity transform and no CRS / no-data.
fn read_georeferencing<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> (GeoTransform, Option<CRS>, Option<f64>) {
    let transform = read_geotransform(decoder).unwrap_or_default();
    let crs = read_crs(decoder);
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());
    (transform, crs, nodata)
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        return Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
    }
    None
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
    if keys.len() < 4 {
        return None;
    }
    // Header [version, revision, minor, count] then (id, location, count, value)
    let count = keys[3] as usize;
    keys[4..]
        .chunks_exact(4)
        .take(count)
        .find(|k| {
            (k[0] == PROJECTED_CS_TYPE_KEY || k[0] == GEOGRAPHIC_TYPE_KEY)
                && k[1] == 0
                && k[3] != 0
                && k[3] != 32767
        })
        .map(|k| CRS::from_epsg(<u32 as From<u16>>::from(k[3])))
}

fn geo_keys(crs: Option<&CRS>) -> Vec<u16> {
    // EPSG codes above u16 range cannot be stored inline
    let epsg = crs
        .and_then(|c| c.epsg())
        .and_then(|code| u16::try_from(code).ok());
    let geographic = crs.map(|c| c.is_geographic()).unwrap_or(false);

    let mut keys: Vec<u16> = vec![
        1, 1, 0, 2,
        GT_MODEL_TYPE_KEY, 0, 1, if geographic { 2 } else { 1 },
        GT_RASTER_TYPE_KEY, 0, 1, 1,
    ];
    if let Some(code) = epsg {
        let key = if geographic {
            GEOGRAPHIC_TYPE_KEY
        } else {
            PROJECTED_CS_TYPE_KEY
        };
        keys.extend_from_slice(&[key, 0, 1, code]);
        keys[3] = 3;
    }
    keys
}

/// Write every band as its own page, in the image's data type
pub fn write_geotiff<P: AsRef<Path>>(image: &MultiBandRaster, path: P) -> Result<()> {
    let mut file = BufWriter::new(File::create(path.as_ref())?);
    encode_geotiff(image, &mut file)?;
    file.flush()?;
    Ok(())
}

/// Same as [`write_geotiff`] into an in-memory buffer
pub fn write_geotiff_to_buffer(image: &MultiBandRaster) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(image, Cursor::new(&mut buf))?;
    Ok(buf)
}

/// Write a typed single-band raster
pub fn write_raster<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    write_geotiff(&raster_to_image(raster), path)
}

/// Lift a single-band raster into a one-band image of the same data type
pub fn raster_to_image<T: RasterElement>(raster: &Raster<T>) -> MultiBandRaster {
    let data = raster
        .data()
        .mapv(|v| v.to_f64().unwrap_or(f64::NAN))
        .insert_axis(ndarray::Axis(0));
    let mut image = MultiBandRaster::from_array(data, T::data_type());
    image.set_transform(*raster.transform());
    image.set_crs(raster.crs().cloned());
    image.set_nodata(raster.nodata().and_then(|v| v.to_f64()));
    image
}

fn encode_geotiff<W: Write + Seek>(image: &MultiBandRaster, writer: W) -> Result<()> {
    let mut encoder = TiffEncoder::new(writer)?;
    let meta = PageMeta::of(image);

    for b in 0..image.bands() {
        let band = image.band(b);
        match image.data_type() {
            DataType::U8 => write_page::<Gray8, _>(&mut encoder, band, &meta)?,
            DataType::U16 => write_page::<Gray16, _>(&mut encoder, band, &meta)?,
            DataType::U32 => write_page::<Gray32, _>(&mut encoder, band, &meta)?,
            DataType::I16 => write_page::<GrayI16, _>(&mut encoder, band, &meta)?,
            DataType::I32 => write_page::<GrayI32, _>(&mut encoder, band, &meta)?,
            DataType::F32 => write_page::<Gray32Float, _>(&mut encoder, band, &meta)?,
            DataType::F64 => write_page::<Gray64Float, _>(&mut encoder, band, &meta)?,
        }
    }
    Ok(())
}

/// Georeferencing tags repeated on every page
struct PageMeta {
    scale: [f64; 3],
    tiepoint: [f64; 6],
    geokeys: Vec<u16>,
    nodata: Option<String>,
}

impl PageMeta {
    fn of(image: &MultiBandRaster) -> Self {
        let gt = image.transform();
        Self {
            scale: [gt.pixel_width, gt.pixel_height.abs(), 0.0],
            tiepoint: [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0],
            geokeys: geo_keys(image.crs()),
            nodata: image.nodata().map(|v| v.to_string()),
        }
    }
}

fn write_page<C, W>(
    encoder: &mut TiffEncoder<W>,
    band: ArrayView2<'_, f64>,
    meta: &PageMeta,
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    C::Inner: NumCast + Zero + Copy,
    W: Write + Seek,
{
    let (rows, cols) = band.dim();
    let mut page = encoder.new_image::<C>(cols as u32, rows as u32)?;
    page.rows_per_strip(STRIP_ROWS)?;

    page.encoder()
        .write_tag(Tag::ModelPixelScaleTag, &meta.scale[..])?;
    page.encoder()
        .write_tag(Tag::ModelTiepointTag, &meta.tiepoint[..])?;
    page.encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, meta.geokeys.as_slice())?;
    if let Some(nodata) = &meta.nodata {
        page.encoder().write_tag(Tag::GdalNodata, nodata.as_str())?;
    }

    // Values that do not fit the pixel type (NaN in an integer band) become 0
    let data: Vec<C::Inner> = band
        .iter()
        .map(|&v| NumCast::from(v).unwrap_or_else(C::Inner::zero))
        .collect();
    page.write_data(&data)?;
    Ok(())
}
