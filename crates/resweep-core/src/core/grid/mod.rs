//! Volumetric density field on a regular cubic grid.

pub mod mrc;

use self::mrc::MrcError;
use nalgebra::Point3;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const VOXEL_SIZE_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("Grid of shape {shape:?} needs {expected} values, got {actual}")]
    ShapeMismatch {
        shape: [usize; 3],
        expected: usize,
        actual: usize,
    },
    #[error("Voxel size must be positive and finite, got {0}")]
    InvalidVoxelSize(f64),
}

#[derive(Debug, Error)]
pub enum FieldIoError {
    #[error("Unsupported map file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("Failed to read map '{path}': {source}")]
    Mrc { path: PathBuf, source: MrcError },
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// A scalar field sampled on a cubic grid, stored with x varying fastest.
///
/// Grid point `(x, y, z)` sits at `origin + (x, y, z) * voxel_size` in Angstroms.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGrid {
    values: Vec<f32>,
    shape: [usize; 3],
    voxel_size: f64,
    origin: Point3<f64>,
}

impl FieldGrid {
    pub fn zeros(shape: [usize; 3], voxel_size: f64, origin: Point3<f64>) -> Result<Self, GridError> {
        Self::from_values(vec![0.0; shape.iter().product()], shape, voxel_size, origin)
    }

    pub fn from_values(
        values: Vec<f32>,
        shape: [usize; 3],
        voxel_size: f64,
        origin: Point3<f64>,
    ) -> Result<Self, GridError> {
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(GridError::ShapeMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(GridError::InvalidVoxelSize(voxel_size));
        }
        Ok(Self {
            values,
            shape,
            voxel_size,
            origin,
        })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.shape[1] + y) * self.shape[0] + x
    }

    /// Value at a grid point. Panics when the point is outside the grid.
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.values[self.index(x, y, z)]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        let i = self.index(x, y, z);
        self.values[i] = value;
    }

    fn value_or_zero(&self, x: i64, y: i64, z: i64) -> f64 {
        let inside = |v: i64, n: usize| v >= 0 && (v as usize) < n;
        if inside(x, self.shape[0]) && inside(y, self.shape[1]) && inside(z, self.shape[2]) {
            self.get(x as usize, y as usize, z as usize) as f64
        } else {
            0.0
        }
    }

    /// Trilinear interpolation at a point in Angstroms; grid points outside the map count as zero.
    pub fn sample(&self, point: &Point3<f64>) -> f64 {
        let g = (point - self.origin) / self.voxel_size;
        let base = [g.x.floor(), g.y.floor(), g.z.floor()];
        let frac = [g.x - base[0], g.y - base[1], g.z - base[2]];
        let [bx, by, bz] = base.map(|b| b as i64);

        let mut acc = 0.0;
        for dz in 0..2 {
            let wz = if dz == 0 { 1.0 - frac[2] } else { frac[2] };
            for dy in 0..2 {
                let wy = if dy == 0 { 1.0 - frac[1] } else { frac[1] };
                for dx in 0..2 {
                    let wx = if dx == 0 { 1.0 - frac[0] } else { frac[0] };
                    let w = wx * wy * wz;
                    if w > 0.0 {
                        acc += w * self.value_or_zero(bx + dx, by + dy, bz + dz);
                    }
                }
            }
        }
        acc
    }

    /// Mean and population standard deviation of all grid values.
    pub fn statistics(&self) -> (f64, f64) {
        if self.values.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.values.len() as f64;
        let mean = self.values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    }

    /// Shifts and scales the field to zero mean and unit standard deviation.
    /// A constant field becomes all zeros.
    pub fn standardize(&mut self) {
        let (mean, std) = self.statistics();
        if std <= f64::EPSILON {
            self.values.iter_mut().for_each(|v| *v = 0.0);
            return;
        }
        for v in &mut self.values {
            *v = ((*v as f64 - mean) / std) as f32;
        }
    }

    /// Trilinear resampling onto a grid with a new voxel size covering the same extent.
    pub fn resample(&self, target_voxel_size: f64) -> Result<FieldGrid, GridError> {
        if !(target_voxel_size.is_finite() && target_voxel_size > 0.0) {
            return Err(GridError::InvalidVoxelSize(target_voxel_size));
        }
        let scale = self.voxel_size / target_voxel_size;
        let shape = self
            .shape
            .map(|n| (((n.saturating_sub(1)) as f64 * scale).floor() as usize) + 1);

        let mut values = Vec::with_capacity(shape.iter().product());
        for z in 0..shape[2] {
            for y in 0..shape[1] {
                for x in 0..shape[0] {
                    let point = self.origin
                        + nalgebra::Vector3::new(x as f64, y as f64, z as f64) * target_voxel_size;
                    values.push(self.sample(&point) as f32);
                }
            }
        }
        debug!(from = ?self.shape, to = ?shape, target_voxel_size, "Resampled field grid.");
        FieldGrid::from_values(values, shape, target_voxel_size, self.origin)
    }
}

/// Loads a density map, resamples it to `target_voxel_size` when one is given and the
/// voxel size differs, then standardizes it.
///
/// # Errors
///
/// Returns [`FieldIoError::UnsupportedFormat`] for extensions other than `.mrc`, `.map`
/// and `.ccp4`, or the reader error wrapped with the path.
pub fn load_field(path: &Path, target_voxel_size: Option<f64>) -> Result<FieldGrid, FieldIoError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if !matches!(extension.as_deref(), Some("mrc" | "map" | "ccp4")) {
        return Err(FieldIoError::UnsupportedFormat(path.to_path_buf()));
    }

    let mut grid = mrc::read_path(path).map_err(|source| FieldIoError::Mrc {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(target) = target_voxel_size {
        if (grid.voxel_size() - target).abs() > VOXEL_SIZE_TOLERANCE {
            grid = grid.resample(target)?;
        }
    }
    grid.standardize();

    info!(
        path = %path.display(),
        shape = ?grid.shape(),
        voxel_size = grid.voxel_size(),
        "Density map loaded."
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::BufWriter;
    use tempfile::tempdir;

    fn ramp(shape: [usize; 3], voxel_size: f64) -> FieldGrid {
        let mut grid = FieldGrid::zeros(shape, voxel_size, Point3::origin()).unwrap();
        for z in 0..shape[2] {
            for y in 0..shape[1] {
                for x in 0..shape[0] {
                    grid.set(x, y, z, x as f32);
                }
            }
        }
        grid
    }

    #[test]
    fn from_values_checks_length_and_voxel_size() {
        assert!(matches!(
            FieldGrid::from_values(vec![0.0; 5], [2, 2, 2], 1.0, Point3::origin()),
            Err(GridError::ShapeMismatch { expected: 8, actual: 5, .. })
        ));
        assert_eq!(
            FieldGrid::zeros([1, 1, 1], 0.0, Point3::origin()).unwrap_err(),
            GridError::InvalidVoxelSize(0.0)
        );
    }

    #[test]
    fn sample_interpolates_between_grid_points() {
        let grid = ramp([4, 2, 2], 2.0);
        assert!((grid.sample(&Point3::new(2.0, 0.0, 0.0)) - 1.0).abs() < 1e-9);
        assert!((grid.sample(&Point3::new(3.0, 1.0, 1.0)) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn sample_outside_grid_is_zero() {
        let grid = ramp([4, 2, 2], 1.0);
        assert_eq!(grid.sample(&Point3::new(-5.0, 0.0, 0.0)), 0.0);
        assert_eq!(grid.sample(&Point3::new(1.0, 10.0, 0.0)), 0.0);
    }

    #[test]
    fn standardize_gives_zero_mean_unit_std() {
        let mut grid = ramp([4, 3, 2], 1.0);
        grid.standardize();
        let (mean, std) = grid.statistics();
        assert!(mean.abs() < 1e-6);
        assert!((std - 1.0).abs() < 1e-6);
    }

    #[test]
    fn standardize_constant_field_is_zero() {
        let mut grid = FieldGrid::from_values(vec![3.0; 8], [2, 2, 2], 1.0, Point3::origin()).unwrap();
        grid.standardize();
        assert!(grid.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn resample_keeps_extent_and_values() {
        let grid = ramp([5, 3, 3], 1.0);
        let fine = grid.resample(0.5).unwrap();
        assert_eq!(fine.shape(), [9, 5, 5]);
        assert_eq!(fine.voxel_size(), 0.5);
        assert!((fine.get(3, 0, 0) - 1.5).abs() < 1e-6);
        assert!((fine.get(8, 4, 4) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn load_field_resamples_and_standardizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.mrc");
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            mrc::write_to(&ramp([5, 3, 3], 1.0), &mut writer).unwrap();
        }

        let grid = load_field(&path, Some(0.5)).unwrap();
        assert_eq!(grid.shape(), [9, 5, 5]);
        let (mean, std) = grid.statistics();
        assert!(mean.abs() < 1e-5);
        assert!((std - 1.0).abs() < 1e-5);
    }

    #[test]
    fn load_field_rejects_unknown_extension() {
        let err = load_field(Path::new("density.xyz"), None).unwrap_err();
        assert!(matches!(err, FieldIoError::UnsupportedFormat(_)));
    }
}
