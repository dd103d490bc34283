//! Pixelized-sphere utilities: HEALPix grid, masks and harmonic transforms.
//!
//! Pixel indexing and pixel/angle conversion are delegated to `cdshealpix`
//! (NESTED scheme). All maps sharing a data set must come from the same
//! [`SkyGrid`]; functions taking maps check their length against the grid.

pub mod grid;
pub mod harmonics;
pub mod mask;

pub use grid::{Ring, SkyGrid};
pub use harmonics::{alm_to_map, cross_power, map_to_alm, synthesize_gaussian, Alm};
pub use mask::Mask;
