//! HEALPix grid adapter over `cdshealpix`.

use crate::error::{Error, Result};
use cdshealpix::nested;
use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Pixels sharing one iso-latitude ring, ordered by longitude.
#[derive(Debug, Clone)]
pub struct Ring {
    /// cos(colatitude) of the ring
    pub cos_theta: f64,
    pub pixels: Vec<usize>,
    /// Longitude of each pixel center in radians
    pub phis: Vec<f64>,
}

/// Fixed-resolution HEALPix pixelization (NESTED ordering).
#[derive(Debug, Clone)]
pub struct SkyGrid {
    depth: u8,
    /// (longitude, latitude) of each pixel center in radians
    centers: Vec<(f64, f64)>,
    rings: Vec<Ring>,
}

// Latitudes of pixels in one ring agree to far better than this
const RING_KEY_SCALE: f64 = 1e9;

impl SkyGrid {
    /// Build the grid for HEALPix `depth` (nside = 2^depth).
    pub fn new(depth: u8) -> Result<Self> {
        if depth > 12 {
            return Err(Error::Configuration(format!(
                "HEALPix depth {depth} exceeds the supported maximum 12"
            )));
        }
        let layer = nested::get(depth);
        let npix = cdshealpix::n_hash(depth) as usize;

        let centers: Vec<(f64, f64)> = (0..npix).map(|p| layer.center(p as u64)).collect();

        let mut by_latitude: BTreeMap<i64, Vec<(f64, usize)>> = BTreeMap::new();
        for (pix, &(lon, lat)) in centers.iter().enumerate() {
            let key = (lat * RING_KEY_SCALE).round() as i64;
            by_latitude.entry(key).or_default().push((lon, pix));
        }

        // North to south
        let rings = by_latitude
            .into_iter()
            .rev()
            .map(|(_, mut members)| {
                members.sort_by(|a, b| a.0.total_cmp(&b.0));
                let lat = centers[members[0].1].1;
                Ring {
                    cos_theta: lat.sin(),
                    pixels: members.iter().map(|&(_, p)| p).collect(),
                    phis: members.iter().map(|&(lon, _)| lon).collect(),
                }
            })
            .collect();

        Ok(Self {
            depth,
            centers,
            rings,
        })
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn nside(&self) -> u32 {
        1 << self.depth
    }

    pub fn npix(&self) -> usize {
        self.centers.len()
    }

    /// Band limit of the pixelization, 3 nside - 1
    pub fn lmax(&self) -> usize {
        3 * self.nside() as usize - 1
    }

    /// Solid angle of one pixel in steradians
    pub fn pixel_area(&self) -> f64 {
        4.0 * PI / self.npix() as f64
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    /// (longitude, latitude) of a pixel center in radians
    pub fn center(&self, pixel: usize) -> (f64, f64) {
        self.centers[pixel]
    }

    /// Pixel containing the direction (longitude, latitude) in radians.
    pub fn pixel_of(&self, lon: f64, lat: f64) -> usize {
        let lon = lon.rem_euclid(TAU);
        let lat = lat.clamp(-FRAC_PI_2, FRAC_PI_2);
        nested::get(self.depth).hash(lon, lat) as usize
    }

    /// Verify that a map has one value per pixel of this grid.
    pub fn check_map_len(&self, len: usize) -> Result<()> {
        if len != self.npix() {
            return Err(Error::Configuration(format!(
                "map has {len} pixels but the depth-{} grid has {}",
                self.depth,
                self.npix()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_counts() {
        let grid = SkyGrid::new(3).unwrap();
        assert_eq!(grid.nside(), 8);
        assert_eq!(grid.npix(), 768);
        assert_eq!(grid.lmax(), 23);
        assert_relative_eq!(grid.pixel_area() * 768.0, 4.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_rings_partition_pixels() {
        let grid = SkyGrid::new(2).unwrap();
        // HEALPix has 4 nside - 1 iso-latitude rings
        assert_eq!(grid.rings().len(), 4 * 4 - 1);

        let mut seen = vec![false; grid.npix()];
        for ring in grid.rings() {
            assert_eq!(ring.pixels.len(), ring.phis.len());
            for &p in &ring.pixels {
                assert!(!seen[p], "pixel {p} in two rings");
                seen[p] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));

        // North to south ordering
        for w in grid.rings().windows(2) {
            assert!(w[0].cos_theta > w[1].cos_theta);
        }
    }

    #[test]
    fn test_pixel_of_center_roundtrip() {
        let grid = SkyGrid::new(3).unwrap();
        for pix in (0..grid.npix()).step_by(7) {
            let (lon, lat) = grid.center(pix);
            assert_eq!(grid.pixel_of(lon, lat), pix);
        }
        // Longitude wrapping and latitude clamping
        let (lon, lat) = grid.center(5);
        assert_eq!(grid.pixel_of(lon + TAU, lat), 5);
        assert!(grid.pixel_of(0.0, 2.0) < grid.npix());
    }

    #[test]
    fn test_check_map_len() {
        let grid = SkyGrid::new(1).unwrap();
        assert!(grid.check_map_len(48).is_ok());
        assert!(matches!(
            grid.check_map_len(49),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_depth_limit() {
        assert!(SkyGrid::new(13).is_err());
    }
}
