//! FITS image I/O for effective-area tables and sky maps.

use crate::error::{Error, Result};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::{Array1, Array2, ArrayView1};
use std::path::Path;

/// Read the first non-empty image of a FITS file as a (rows x columns) array.
///
/// One-dimensional images come back as a single row. Files written by this
/// module keep an empty primary HDU and store data in an extension.
pub fn read_image(path: &Path) -> Result<Array2<f64>> {
    let mut fptr = FitsFile::open(path)?;

    let mut hdu_idx = 0;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        hdu_idx += 1;
        let naxis = hdu.read_key::<i64>(&mut fptr, "NAXIS").unwrap_or(0);
        let shape = match naxis {
            1 => {
                let naxis1 = hdu.read_key::<i64>(&mut fptr, "NAXIS1")? as usize;
                (1, naxis1)
            }
            2 => {
                let naxis1 = hdu.read_key::<i64>(&mut fptr, "NAXIS1")? as usize;
                let naxis2 = hdu.read_key::<i64>(&mut fptr, "NAXIS2")? as usize;
                (naxis2, naxis1)
            }
            _ => continue,
        };
        if shape.0 * shape.1 == 0 {
            continue;
        }
        let data: Vec<f64> = hdu.read_image(&mut fptr)?;
        return Array2::from_shape_vec(shape, data)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())));
    }

    Err(Error::Configuration(format!(
        "{} contains no 1D or 2D image",
        path.display()
    )))
}

/// Read a single HEALPix map stored as a 1D image.
pub fn read_map(path: &Path) -> Result<Array1<f64>> {
    let image = read_image(path)?;
    Ok(Array1::from_iter(image.iter().copied()))
}

/// Write one sky map as a 1D double image, tagged with its HEALPix ordering.
pub fn write_map(path: &Path, map: ArrayView1<f64>) -> Result<()> {
    let mut fptr = FitsFile::create(path).overwrite().open()?;
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[map.len()],
    };
    let hdu = fptr.create_image("MAP".to_string(), &description)?;
    let flat: Vec<f64> = map.iter().copied().collect();
    hdu.write_image(&mut fptr, &flat)?;
    hdu.write_key(&mut fptr, "ORDERING", "NESTED".to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_map_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("syntheticData0.fits");
        let map = array![0.0, 1.0, 5.0, 2.0];
        write_map(&path, map.view()).unwrap();

        let back = read_map(&path).unwrap();
        assert_eq!(back, map);
    }
}
