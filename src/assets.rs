//! Asset sources for the effect program and the two lookup tables.
//!
//! The pipeline only sees [`AssetSource`]; whether the data comes from memory,
//! a directory or anywhere else is the caller's business.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MlaaError, MlaaResult};

/// WGSL program shipped with the crate; fulfils the parameter/technique contract
pub const BUILTIN_WGSL: &str = include_str!("shaders/mlaa.wgsl");

pub const SHADER_FILE: &str = "mlaa.wgsl";
pub const AREA_TABLE_FILE: &str = "AreaTex.png";
pub const SEARCH_TABLE_FILE: &str = "SearchTex.png";

/// Texel layout of a lookup table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupFormat {
    /// Coverage-area table: four 8-bit channels
    Rgba8,
    /// Search-distance table: one 8-bit channel
    R8,
}

impl LookupFormat {
    pub const fn channels(self) -> usize {
        match self {
            LookupFormat::Rgba8 => 4,
            LookupFormat::R8 => 1,
        }
    }
}

/// Precomputed table, tightly packed rows, top row first
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupImage {
    width: u32,
    height: u32,
    format: LookupFormat,
    data: Vec<u8>,
}

impl LookupImage {
    pub fn new(width: u32, height: u32, format: LookupFormat, data: Vec<u8>) -> MlaaResult<Self> {
        if width == 0 || height == 0 {
            return Err(MlaaError::asset(format!(
                "lookup table must not be empty ({width}x{height})"
            )));
        }
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(MlaaError::asset(format!(
                "lookup table {width}x{height} {format:?} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Table with every texel set to `texel`
    pub fn filled(width: u32, height: u32, format: LookupFormat, texel: &[u8]) -> MlaaResult<Self> {
        if texel.len() != format.channels() {
            return Err(MlaaError::asset(format!(
                "{format:?} texel needs {} channels, got {}",
                format.channels(),
                texel.len()
            )));
        }
        let data = texel.repeat(width as usize * height as usize);
        Self::new(width, height, format, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> LookupFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.format.channels() as u32
    }

    pub fn texel(&self, x: u32, y: u32) -> &[u8] {
        let channels = self.format.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        &self.data[start..start + channels]
    }

    fn expect_format(self, format: LookupFormat, what: &str) -> MlaaResult<Self> {
        if self.format != format {
            return Err(MlaaError::asset(format!(
                "{what} must be {format:?}, got {:?}",
                self.format
            )));
        }
        Ok(self)
    }
}

/// Supplier of the effect source and the two lookup tables
pub trait AssetSource {
    fn shader_code(&self) -> MlaaResult<String>;
    /// Four-channel coverage-area table at native resolution
    fn area_table(&self) -> MlaaResult<LookupImage>;
    /// Single-channel search-distance table at native resolution
    fn search_table(&self) -> MlaaResult<LookupImage>;
}

/// Assets already in memory
#[derive(Clone, Debug)]
pub struct MemoryAssets {
    shader: String,
    area: LookupImage,
    search: LookupImage,
}

impl MemoryAssets {
    pub fn new(shader: impl Into<String>, area: LookupImage, search: LookupImage) -> MlaaResult<Self> {
        Ok(Self {
            shader: shader.into(),
            area: area.expect_format(LookupFormat::Rgba8, "area table")?,
            search: search.expect_format(LookupFormat::R8, "search table")?,
        })
    }

    /// Shipped WGSL program with caller-supplied tables
    pub fn builtin_wgsl(area: LookupImage, search: LookupImage) -> MlaaResult<Self> {
        Self::new(BUILTIN_WGSL, area, search)
    }
}

impl AssetSource for MemoryAssets {
    fn shader_code(&self) -> MlaaResult<String> {
        Ok(self.shader.clone())
    }

    fn area_table(&self) -> MlaaResult<LookupImage> {
        Ok(self.area.clone())
    }

    fn search_table(&self) -> MlaaResult<LookupImage> {
        Ok(self.search.clone())
    }
}

/// Assets read from a directory holding `AreaTex.png`, `SearchTex.png` and
/// optionally `mlaa.wgsl` (the shipped program is used when it is absent).
#[derive(Clone, Debug)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_png(&self, file: &str, format: LookupFormat) -> MlaaResult<LookupImage> {
        let path = self.root.join(file);
        let decoded = image::open(&path)
            .map_err(|e| MlaaError::asset(format!("cannot decode {}: {e}", path.display())))?;

        let channels = decoded.color().channel_count() as usize;
        if channels != format.channels() {
            return Err(MlaaError::asset(format!(
                "{} has {channels} channels, expected {}",
                path.display(),
                format.channels()
            )));
        }

        // Native size, no resampling.
        let (width, height, data) = match format {
            LookupFormat::Rgba8 => {
                let rgba = decoded.into_rgba8();
                (rgba.width(), rgba.height(), rgba.into_raw())
            }
            LookupFormat::R8 => {
                let luma = decoded.into_luma8();
                (luma.width(), luma.height(), luma.into_raw())
            }
        };
        log::debug!(target: "mlaa", "loaded {} ({width}x{height} {format:?})", path.display());
        LookupImage::new(width, height, format, data)
    }
}

impl AssetSource for DirectoryAssets {
    fn shader_code(&self) -> MlaaResult<String> {
        let path = self.root.join(SHADER_FILE);
        if !path.exists() {
            return Ok(BUILTIN_WGSL.to_string());
        }
        fs::read_to_string(&path)
            .map_err(|e| MlaaError::asset(format!("cannot read {}: {e}", path.display())))
    }

    fn area_table(&self) -> MlaaResult<LookupImage> {
        self.load_png(AREA_TABLE_FILE, LookupFormat::Rgba8)
    }

    fn search_table(&self) -> MlaaResult<LookupImage> {
        self.load_png(SEARCH_TABLE_FILE, LookupFormat::R8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_image_checks_byte_count() {
        assert!(LookupImage::new(2, 2, LookupFormat::R8, vec![0; 4]).is_ok());
        assert!(LookupImage::new(2, 2, LookupFormat::Rgba8, vec![0; 4]).is_err());
        assert!(LookupImage::new(0, 2, LookupFormat::R8, vec![]).is_err());
    }

    #[test]
    fn filled_table_repeats_texel() {
        let table = LookupImage::filled(3, 2, LookupFormat::Rgba8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(table.texel(2, 1), &[1, 2, 3, 4]);
        assert_eq!(table.bytes_per_row(), 12);
    }

    #[test]
    fn memory_assets_reject_swapped_tables() {
        let area = LookupImage::filled(5, 5, LookupFormat::Rgba8, &[0; 4]).unwrap();
        let search = LookupImage::filled(8, 1, LookupFormat::R8, &[255]).unwrap();
        assert!(MemoryAssets::builtin_wgsl(area.clone(), search.clone()).is_ok());
        assert!(MemoryAssets::builtin_wgsl(search, area).is_err());
    }
}
