//! File formats: calibration tables, per-bin sky maps, TS arrays and JSON artifacts.
//!
//! Per-bin files are addressed through name templates where `{i}` stands
//! for the energy bin index. Templates ending in `.fits` use FITS images
//! when the `fits` feature is enabled; everything else is plain text.

#[cfg(feature = "fits")]
pub mod fits;
pub mod text;

use crate::config::expand_bin_template;
use crate::error::{Error, Result};
use crate::sky::SkyGrid;
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

fn is_fits(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("fits"))
}

#[cfg(not(feature = "fits"))]
fn fits_unavailable(path: &Path) -> Error {
    Error::Configuration(format!(
        "{} is a FITS file but nuxgal was built without the `fits` feature",
        path.display()
    ))
}

/// Read a 2D numeric grid from a text table or FITS image.
pub fn read_grid(path: &Path) -> Result<Array2<f64>> {
    if is_fits(path) {
        #[cfg(feature = "fits")]
        return fits::read_image(path);
        #[cfg(not(feature = "fits"))]
        return Err(fits_unavailable(path));
    }
    text::read_matrix(path)
}

/// Read one sky map.
pub fn read_map(path: &Path) -> Result<Array1<f64>> {
    if is_fits(path) {
        #[cfg(feature = "fits")]
        return fits::read_map(path);
        #[cfg(not(feature = "fits"))]
        return Err(fits_unavailable(path));
    }
    Ok(Array1::from(text::read_values(path)?))
}

/// Write one sky map.
pub fn write_map(path: &Path, map: ndarray::ArrayView1<f64>) -> Result<()> {
    if is_fits(path) {
        #[cfg(feature = "fits")]
        return fits::write_map(path, map);
        #[cfg(not(feature = "fits"))]
        return Err(fits_unavailable(path));
    }
    text::write_map(path, map)
}

/// Write a (bins x pixels) map set, one file per bin.
///
/// # Returns
/// The paths written, in bin order.
pub fn write_maps(dir: &Path, template: &str, maps: &Array2<f64>) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    maps.rows()
        .into_iter()
        .enumerate()
        .map(|(bin, row)| {
            let path = dir.join(expand_bin_template(template, bin));
            write_map(&path, row)?;
            Ok(path)
        })
        .collect()
}

/// Read `n_bins` maps written by [`write_maps`] and check them against the grid.
pub fn read_maps(dir: &Path, template: &str, n_bins: usize, grid: &SkyGrid) -> Result<Array2<f64>> {
    let mut maps = Array2::zeros((n_bins, grid.npix()));
    for (bin, mut row) in maps.rows_mut().into_iter().enumerate() {
        let path = dir.join(expand_bin_template(template, bin));
        let map = read_map(&path)?;
        grid.check_map_len(map.len()).map_err(|e| {
            Error::Configuration(format!("{}: {e}", path.display()))
        })?;
        row.assign(&map);
    }
    Ok(maps)
}

/// Serialize a value as pretty-printed JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|e| Error::io(path, e))
}

/// Deserialize a JSON file; unreadable or malformed files are configuration errors.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::Configuration(format!("invalid JSON in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_map_set_roundtrip() {
        let dir = TempDir::new().unwrap();
        let grid = SkyGrid::new(1).unwrap();
        let maps = Array2::from_shape_fn((3, grid.npix()), |(bin, pix)| ((bin * 7 + pix) % 5) as f64);

        let written = write_maps(dir.path(), "syntheticData{i}.txt", &maps).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written[2].ends_with("syntheticData2.txt"));

        let back = read_maps(dir.path(), "syntheticData{i}.txt", 3, &grid).unwrap();
        assert_eq!(back, maps);
    }

    #[test]
    fn test_read_maps_rejects_wrong_resolution() {
        let dir = TempDir::new().unwrap();
        let coarse = SkyGrid::new(1).unwrap();
        let fine = SkyGrid::new(2).unwrap();
        let maps = Array2::zeros((1, coarse.npix()));
        write_maps(dir.path(), "m{i}.txt", &maps).unwrap();

        let err = read_maps(dir.path(), "m{i}.txt", 1, &fine).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_json_errors_are_configuration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<Vec<f64>>(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        write_json(&path, &vec![1.0, 2.0]).unwrap();
        assert_eq!(read_json::<Vec<f64>>(&path).unwrap(), vec![1.0, 2.0]);
    }

    #[cfg(not(feature = "fits"))]
    #[test]
    fn test_fits_requires_feature() {
        let err = read_grid(Path::new("Aeff0.fits")).unwrap_err();
        assert!(err.to_string().contains("fits"));
    }
}
