use super::FieldGrid;
use nalgebra::Point3;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

pub const HEADER_LEN: usize = 1024;

const WORD_MODE: usize = 3;
const WORD_START: usize = 4;
const WORD_SAMPLING: usize = 7;
const WORD_CELL: usize = 10;
const WORD_AXIS_MAP: usize = 16;
const WORD_NSYMBT: usize = 23;
const WORD_ORIGIN: usize = 49;
const MAP_TAG_OFFSET: usize = 208;
const MACHINE_STAMP_OFFSET: usize = 212;

const STAMP_LITTLE_ENDIAN: u8 = 0x44;
const STAMP_BIG_ENDIAN: u8 = 0x11;

#[derive(Debug, Error)]
pub enum MrcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Unsupported MRC data mode {0} (supported: 0, 1, 2, 6)")]
    UnsupportedMode(i32),
    #[error("Invalid MRC header: {0}")]
    InvalidHeader(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataMode {
    Int8,
    Int16,
    Float32,
    UInt16,
}

impl DataMode {
    fn from_code(code: i32) -> Result<Self, MrcError> {
        match code {
            0 => Ok(Self::Int8),
            1 => Ok(Self::Int16),
            2 => Ok(Self::Float32),
            6 => Ok(Self::UInt16),
            other => Err(MrcError::UnsupportedMode(other)),
        }
    }

    fn value_size(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 => 4,
        }
    }
}

struct HeaderReader<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl HeaderReader<'_> {
    fn word(&self, index: usize) -> [u8; 4] {
        let start = index * 4;
        [
            self.bytes[start],
            self.bytes[start + 1],
            self.bytes[start + 2],
            self.bytes[start + 3],
        ]
    }

    fn int(&self, index: usize) -> i32 {
        if self.big_endian {
            i32::from_be_bytes(self.word(index))
        } else {
            i32::from_le_bytes(self.word(index))
        }
    }

    fn float(&self, index: usize) -> f32 {
        if self.big_endian {
            f32::from_be_bytes(self.word(index))
        } else {
            f32::from_le_bytes(self.word(index))
        }
    }

    fn value(&self, data: &[u8], mode: DataMode, i: usize) -> f32 {
        let at = i * mode.value_size();
        match mode {
            DataMode::Int8 => data[at] as i8 as f32,
            DataMode::Int16 => {
                let b = [data[at], data[at + 1]];
                (if self.big_endian { i16::from_be_bytes(b) } else { i16::from_le_bytes(b) }) as f32
            }
            DataMode::UInt16 => {
                let b = [data[at], data[at + 1]];
                (if self.big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }) as f32
            }
            DataMode::Float32 => {
                let b = [data[at], data[at + 1], data[at + 2], data[at + 3]];
                if self.big_endian { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) }
            }
        }
    }
}

fn positive_dim(value: i32, name: &str) -> Result<usize, MrcError> {
    usize::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| MrcError::InvalidHeader(format!("{} must be positive, found {}", name, value)))
}

/// Decodes an MRC/CCP4 map held in memory into an x-fastest [`FieldGrid`].
pub fn parse(bytes: &[u8]) -> Result<FieldGrid, MrcError> {
    if bytes.len() < HEADER_LEN {
        return Err(MrcError::InvalidHeader(format!(
            "file is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    let big_endian = bytes[MACHINE_STAMP_OFFSET] == STAMP_BIG_ENDIAN;
    let header = HeaderReader { bytes, big_endian };

    let counts = [
        positive_dim(header.int(0), "NC")?,
        positive_dim(header.int(1), "NR")?,
        positive_dim(header.int(2), "NS")?,
    ];
    let mode = DataMode::from_code(header.int(WORD_MODE))?;

    let mut axis_map = [0usize; 3];
    for (k, slot) in axis_map.iter_mut().enumerate() {
        let axis = header.int(WORD_AXIS_MAP + k);
        if !(1..=3).contains(&axis) {
            return Err(MrcError::InvalidHeader(format!("axis mapping value {} out of range", axis)));
        }
        *slot = (axis - 1) as usize;
    }
    if axis_map[0] == axis_map[1] || axis_map[0] == axis_map[2] || axis_map[1] == axis_map[2] {
        return Err(MrcError::InvalidHeader(format!(
            "MAPC/MAPR/MAPS {:?} is not a permutation",
            axis_map.map(|a| a + 1)
        )));
    }

    // shape[axis] for x, y, z
    let mut shape = [0usize; 3];
    let mut start = [0f64; 3];
    for k in 0..3 {
        shape[axis_map[k]] = counts[k];
        start[axis_map[k]] = header.int(WORD_START + k) as f64;
    }

    let sampling = header.int(WORD_SAMPLING);
    let cell_x = header.float(WORD_CELL) as f64;
    let voxel_size = if sampling > 0 && cell_x > 0.0 {
        cell_x / sampling as f64
    } else {
        1.0
    };
    let sampling_y = header.int(WORD_SAMPLING + 1);
    let cell_y = header.float(WORD_CELL + 1) as f64;
    if sampling_y > 0 && (cell_y / sampling_y as f64 - voxel_size).abs() > 1e-3 {
        warn!(
            voxel_x = voxel_size,
            voxel_y = cell_y / sampling_y as f64,
            "Map voxels are not cubic; using the x spacing."
        );
    }

    let origin_words = [
        header.float(WORD_ORIGIN) as f64,
        header.float(WORD_ORIGIN + 1) as f64,
        header.float(WORD_ORIGIN + 2) as f64,
    ];
    let origin = if origin_words.iter().any(|&o| o != 0.0) {
        Point3::new(origin_words[0], origin_words[1], origin_words[2])
    } else {
        Point3::new(start[0] * voxel_size, start[1] * voxel_size, start[2] * voxel_size)
    };

    let nsymbt = usize::try_from(header.int(WORD_NSYMBT)).unwrap_or(0);
    let oversized = || {
        MrcError::InvalidHeader(format!(
            "map of {}x{}x{} voxels (extended header {} bytes) exceeds addressable size",
            counts[0], counts[1], counts[2], nsymbt
        ))
    };
    let data_start = HEADER_LEN.checked_add(nsymbt).ok_or_else(oversized)?;
    let total = counts[0]
        .checked_mul(counts[1])
        .and_then(|n| n.checked_mul(counts[2]))
        .ok_or_else(oversized)?;
    let data_len = total.checked_mul(mode.value_size()).ok_or_else(oversized)?;
    let data_end = data_start.checked_add(data_len).ok_or_else(oversized)?;
    let data = bytes
        .get(data_start..data_end)
        .ok_or_else(|| {
            MrcError::InvalidHeader(format!(
                "expected {} bytes of voxel data after offset {}, file has {}",
                data_len,
                data_start,
                bytes.len()
            ))
        })?;

    let mut values = vec![0f32; total];
    let mut i = 0;
    let mut xyz = [0usize; 3];
    for s in 0..counts[2] {
        for r in 0..counts[1] {
            for c in 0..counts[0] {
                xyz[axis_map[0]] = c;
                xyz[axis_map[1]] = r;
                xyz[axis_map[2]] = s;
                values[(xyz[2] * shape[1] + xyz[1]) * shape[0] + xyz[0]] = header.value(data, mode, i);
                i += 1;
            }
        }
    }

    FieldGrid::from_values(values, shape, voxel_size, origin)
        .map_err(|e| MrcError::InvalidHeader(e.to_string()))
}

pub fn read_path(path: &Path) -> Result<FieldGrid, MrcError> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// Writes a little-endian mode-2 map with identity axis order.
pub fn write_to(grid: &FieldGrid, writer: &mut impl Write) -> Result<(), MrcError> {
    let mut header = [0u8; HEADER_LEN];
    let put_int = |header: &mut [u8; HEADER_LEN], word: usize, value: i32| {
        header[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
    };
    let put_float = |header: &mut [u8; HEADER_LEN], word: usize, value: f32| {
        header[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
    };

    let shape = grid.shape();
    for (k, &n) in shape.iter().enumerate() {
        let n = i32::try_from(n)
            .map_err(|_| MrcError::InvalidHeader(format!("dimension {} too large", n)))?;
        put_int(&mut header, k, n);
        put_int(&mut header, WORD_SAMPLING + k, n);
        put_float(&mut header, WORD_CELL + k, (n as f64 * grid.voxel_size()) as f32);
        put_float(&mut header, WORD_CELL + 3 + k, 90.0);
        put_int(&mut header, WORD_AXIS_MAP + k, k as i32 + 1);
    }
    put_int(&mut header, WORD_MODE, 2);

    let (min, max, mean) = grid
        .values()
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY, 0f64), |(lo, hi, sum), &v| {
            (lo.min(v), hi.max(v), sum + v as f64)
        });
    let mean = if grid.values().is_empty() { 0.0 } else { mean / grid.values().len() as f64 };
    put_float(&mut header, 19, min);
    put_float(&mut header, 20, max);
    put_float(&mut header, 21, mean as f32);

    let origin = grid.origin();
    put_float(&mut header, WORD_ORIGIN, origin.x as f32);
    put_float(&mut header, WORD_ORIGIN + 1, origin.y as f32);
    put_float(&mut header, WORD_ORIGIN + 2, origin.z as f32);

    header[MAP_TAG_OFFSET..MAP_TAG_OFFSET + 4].copy_from_slice(b"MAP ");
    header[MACHINE_STAMP_OFFSET] = STAMP_LITTLE_ENDIAN;
    header[MACHINE_STAMP_OFFSET + 1] = STAMP_LITTLE_ENDIAN;

    writer.write_all(&header)?;
    for value in grid.values() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}
