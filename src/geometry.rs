//! Image, filter and tile geometry shared by convolution and pooling.
//!
//! Multi-channel images are flattened channel-major, then row-major within a channel:
//! index `c * height * width + row * width + col`.

use crate::linalg::Matrix;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageShape {
    channels: usize,
    height: usize,
    width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Result<Self> {
        if channels == 0 || height == 0 || width == 0 {
            return Err(Error::InvalidConfig(format!(
                "image dims must be > 0, got {channels} x {height} x {width}"
            )));
        }
        if channels
            .checked_mul(height)
            .and_then(|n| n.checked_mul(width))
            .is_none()
        {
            return Err(Error::InvalidConfig(format!(
                "{channels} x {height} x {width} image overflows usize"
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
        })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Elements in one channel.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels * self.plane_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, channel: usize, row: usize, col: usize) -> usize {
        channel * self.plane_len() + row * self.width + col
    }
}

/// Non-overlapping tiling of every channel of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolGeometry {
    image: ImageShape,
    tile_height: usize,
    tile_width: usize,
}

impl PoolGeometry {
    /// Tile dimensions must evenly divide the channel dimensions.
    pub fn new(image: ImageShape, tile_height: usize, tile_width: usize) -> Result<Self> {
        if tile_height == 0 || tile_width == 0 {
            return Err(Error::InvalidConfig(format!(
                "tile dims must be > 0, got {tile_height} x {tile_width}"
            )));
        }
        if image.height() % tile_height != 0 || image.width() % tile_width != 0 {
            return Err(Error::InvalidShape(format!(
                "{tile_height} x {tile_width} tiles do not evenly divide {} x {} channels",
                image.height(),
                image.width()
            )));
        }
        Ok(Self {
            image,
            tile_height,
            tile_width,
        })
    }

    #[inline]
    pub fn image(&self) -> ImageShape {
        self.image
    }

    #[inline]
    pub fn tile_height(&self) -> usize {
        self.tile_height
    }

    #[inline]
    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    pub fn output_shape(&self) -> ImageShape {
        ImageShape {
            channels: self.image.channels,
            height: self.image.height / self.tile_height,
            width: self.image.width / self.tile_width,
        }
    }

    #[inline]
    pub fn input_len(&self) -> usize {
        self.image.len()
    }

    #[inline]
    pub fn output_len(&self) -> usize {
        self.output_shape().len()
    }

    /// For every output element, the input index holding the maximum of its tile.
    ///
    /// Tiles are scanned in row-major order and a later element only wins if it is strictly
    /// greater, so ties resolve to the first element encountered.
    pub fn argmax(&self, input: &[f64]) -> Vec<usize> {
        assert_eq!(
            input.len(),
            self.input_len(),
            "pool input len {} does not match image len {}",
            input.len(),
            self.input_len()
        );

        let out = self.output_shape();
        let mut sources = Vec::with_capacity(out.len());
        for c in 0..out.channels {
            for ti in 0..out.height {
                for tj in 0..out.width {
                    let mut best = self.image.index(c, ti * self.tile_height, tj * self.tile_width);
                    for r in 0..self.tile_height {
                        for s in 0..self.tile_width {
                            let idx = self.image.index(
                                c,
                                ti * self.tile_height + r,
                                tj * self.tile_width + s,
                            );
                            if input[idx] > input[best] {
                                best = idx;
                            }
                        }
                    }
                    sources.push(best);
                }
            }
        }
        sources
    }
}

/// Sliding-window geometry of a valid, stride-1 cross-correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterGeometry {
    image: ImageShape,
    filter_height: usize,
    filter_width: usize,
}

impl FilterGeometry {
    pub fn new(image: ImageShape, filter_height: usize, filter_width: usize) -> Result<Self> {
        if filter_height == 0 || filter_width == 0 {
            return Err(Error::InvalidConfig(format!(
                "filter dims must be > 0, got {filter_height} x {filter_width}"
            )));
        }
        if filter_height > image.height() || filter_width > image.width() {
            return Err(Error::InvalidShape(format!(
                "{filter_height} x {filter_width} filter does not fit {} x {} channels",
                image.height(),
                image.width()
            )));
        }
        let geometry = Self {
            image,
            filter_height,
            filter_width,
        };
        // The banded operator stores one entry per (output, tap) pair.
        if geometry.output_area().checked_mul(geometry.taps()).is_none() {
            return Err(Error::InvalidConfig(format!(
                "{filter_height} x {filter_width} filter over {} x {} channels overflows usize",
                image.height(),
                image.width()
            )));
        }
        Ok(geometry)
    }

    #[inline]
    pub fn image(&self) -> ImageShape {
        self.image
    }

    #[inline]
    pub fn filter_height(&self) -> usize {
        self.filter_height
    }

    #[inline]
    pub fn filter_width(&self) -> usize {
        self.filter_width
    }

    /// Weights per filter.
    #[inline]
    pub fn taps(&self) -> usize {
        self.filter_height * self.filter_width
    }

    #[inline]
    pub fn output_height(&self) -> usize {
        self.image.height() - self.filter_height + 1
    }

    #[inline]
    pub fn output_width(&self) -> usize {
        self.image.width() - self.filter_width + 1
    }

    /// Elements in one (channel, filter) output block.
    #[inline]
    pub fn output_area(&self) -> usize {
        self.output_height() * self.output_width()
    }
}

/// One nonzero of a [`FilterOperator`]: `out[row] += weights[tap] * plane[col]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandEntry {
    pub row: usize,
    pub col: usize,
    pub tap: usize,
}

/// A filter as a sparse linear map from one input plane to one output plane.
///
/// The nonzero pattern depends only on the geometry; the values are the filter weights,
/// looked up by tap. Built once per layer and reused for every filter and channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOperator {
    geometry: FilterGeometry,
    band: Vec<BandEntry>,
}

impl FilterOperator {
    pub fn new(geometry: FilterGeometry) -> Self {
        let width = geometry.image.width();
        let out_width = geometry.output_width();
        let mut band = Vec::with_capacity(geometry.output_area() * geometry.taps());
        for i in 0..geometry.output_height() {
            for j in 0..out_width {
                for r in 0..geometry.filter_height {
                    for s in 0..geometry.filter_width {
                        band.push(BandEntry {
                            row: i * out_width + j,
                            col: (i + r) * width + (j + s),
                            tap: r * geometry.filter_width + s,
                        });
                    }
                }
            }
        }
        Self { geometry, band }
    }

    #[inline]
    pub fn geometry(&self) -> FilterGeometry {
        self.geometry
    }

    #[inline]
    pub fn band(&self) -> &[BandEntry] {
        &self.band
    }

    /// `K(weights) · plane`.
    pub fn apply(&self, weights: &[f64], plane: &[f64]) -> Vec<f64> {
        assert_eq!(weights.len(), self.geometry.taps(), "filter weight count");
        assert_eq!(plane.len(), self.geometry.image.plane_len(), "input plane len");
        let mut out = vec![0.0; self.geometry.output_area()];
        for e in &self.band {
            out[e.row] = weights[e.tap].mul_add(plane[e.col], out[e.row]);
        }
        out
    }

    /// `T_tap · plane`: the plane elements each output position reads through `tap`.
    pub fn apply_tap(&self, tap: usize, plane: &[f64]) -> Vec<f64> {
        assert_eq!(plane.len(), self.geometry.image.plane_len(), "input plane len");
        let mut out = vec![0.0; self.geometry.output_area()];
        for e in self.band.iter().filter(|e| e.tap == tap) {
            out[e.row] = plane[e.col];
        }
        out
    }

    /// Dense `output_area x plane_len` matrix of `K(weights)`.
    pub fn matrix(&self, weights: &[f64]) -> Matrix {
        assert_eq!(weights.len(), self.geometry.taps(), "filter weight count");
        let mut m = Matrix::zeros(self.geometry.output_area(), self.geometry.image.plane_len());
        for e in &self.band {
            m[(e.row, e.col)] = weights[e.tap];
        }
        m
    }

    /// Dense 0/1 matrix `T_tap`, so that `K(w) = sum_tap w[tap] * T_tap`.
    pub fn tap_matrix(&self, tap: usize) -> Matrix {
        let mut m = Matrix::zeros(self.geometry.output_area(), self.geometry.image.plane_len());
        for e in self.band.iter().filter(|e| e.tap == tap) {
            m[(e.row, e.col)] = 1.0;
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_must_divide_channels() {
        let image = ImageShape::new(1, 4, 6).unwrap();
        assert!(PoolGeometry::new(image, 2, 3).is_ok());
        assert!(matches!(
            PoolGeometry::new(image, 3, 3),
            Err(Error::InvalidShape(_))
        ));
        assert!(PoolGeometry::new(image, 0, 3).is_err());
    }

    #[test]
    fn image_and_filter_sizes_that_overflow_are_rejected() {
        let big = 1usize << 33;
        assert!(matches!(
            ImageShape::new(big, big, 4),
            Err(Error::InvalidConfig(_))
        ));
        assert!(ImageShape::new(1, big, 4).is_ok());

        let wide = ImageShape::new(1, 1, usize::MAX / 2).unwrap();
        assert!(matches!(
            FilterGeometry::new(wide, 1, usize::MAX / 4),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn argmax_prefers_the_first_of_equal_maxima() {
        let image = ImageShape::new(1, 2, 2).unwrap();
        let pool = PoolGeometry::new(image, 2, 2).unwrap();
        assert_eq!(pool.argmax(&[3.0, 1.0, 4.0, 1.0]), vec![2]);
        assert_eq!(pool.argmax(&[5.0, 5.0, 5.0, 5.0]), vec![0]);
        assert_eq!(pool.argmax(&[1.0, 7.0, 2.0, 7.0]), vec![1]);
    }

    #[test]
    fn argmax_walks_tiles_channel_by_channel() {
        let image = ImageShape::new(2, 2, 4).unwrap();
        let pool = PoolGeometry::new(image, 2, 2).unwrap();
        #[rustfmt::skip]
        let input = [
            // channel 0
            1.0, 2.0, 9.0, 0.0,
            0.0, 3.0, 0.0, 0.0,
            // channel 1
            0.0, 0.0, 0.0, 0.0,
            8.0, 0.0, 0.0, 6.0,
        ];
        assert_eq!(pool.argmax(&input), vec![5, 2, 12, 15]);
        assert_eq!(pool.output_shape(), ImageShape::new(2, 1, 2).unwrap());
    }

    #[test]
    fn filter_geometry_is_valid_stride_one() {
        let image = ImageShape::new(2, 4, 5).unwrap();
        let g = FilterGeometry::new(image, 2, 3).unwrap();
        assert_eq!((g.output_height(), g.output_width()), (3, 3));
        assert_eq!(g.output_area(), 9);
        assert!(FilterGeometry::new(image, 5, 1).is_err());
        assert!(FilterGeometry::new(image, 1, 0).is_err());
    }

    #[test]
    fn banded_operator_matches_direct_cross_correlation() {
        let image = ImageShape::new(1, 3, 3).unwrap();
        let op = FilterOperator::new(FilterGeometry::new(image, 2, 2).unwrap());
        let plane: Vec<f64> = (1..=9).map(f64::from).collect();
        let weights = [1.0, 0.0, 0.0, -1.0];

        // out[i][j] = x[i][j] - x[i+1][j+1]
        assert_eq!(op.apply(&weights, &plane), vec![-4.0, -4.0, -4.0, -4.0]);
        assert_eq!(op.apply_tap(3, &plane), vec![5.0, 6.0, 8.0, 9.0]);

        let dense = op.matrix(&weights);
        let mut summed = Matrix::zeros(4, 9);
        for (tap, &w) in weights.iter().enumerate() {
            summed = summed.add(&op.tap_matrix(tap).scale(w));
        }
        assert_eq!(dense, summed);
    }
}
