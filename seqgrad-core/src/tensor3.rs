//! Flat width × height × depth arrays.
//!
//! Values are stored channel-minor: the element at `(x, y, z)` lives at
//! `depth * (y * width + x) + z`. A `Tensor3` may own its storage
//! (`Tensor3<Vec<f64>>`, the default) or view a borrowed slice, which is how
//! layers look at a Variable's buffer or a node's output without copying.

use crate::ops;
use std::cmp::{max, min};

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor3<S = Vec<f64>> {
    width: usize,
    height: usize,
    depth: usize,
    data: S,
}

impl Tensor3 {
    /// Creates a zero-filled tensor.
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Tensor3 {
            width,
            height,
            depth,
            data: vec![0.0; width * height * depth],
        }
    }
}

impl<S: AsRef<[f64]>> Tensor3<S> {
    /// Wraps existing storage.
    ///
    /// # Panics
    /// Panics if `data` does not hold exactly `width * height * depth` values.
    pub fn from_data(width: usize, height: usize, depth: usize, data: S) -> Self {
        let expected = width * height * depth;
        assert_eq!(
            data.as_ref().len(),
            expected,
            "Tensor3 {}x{}x{} needs {} values",
            width,
            height,
            depth,
            expected
        );
        Tensor3 {
            width,
            height,
            depth,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn data(&self) -> &[f64] {
        self.data.as_ref()
    }

    pub fn into_data(self) -> S {
        self.data
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        assert!(
            x < self.width && y < self.height && z < self.depth,
            "index ({}, {}, {}) out of bounds for {}x{}x{} tensor",
            x,
            y,
            z,
            self.width,
            self.height,
            self.depth
        );
        self.depth * (y * self.width + x) + z
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> f64 {
        self.data.as_ref()[self.index(x, y, z)]
    }

    /// Copies the depth-full window whose top-left corner is `(x, y)` into
    /// `dest`. The window size is taken from `dest`.
    ///
    /// # Panics
    /// Panics if the depths differ or the window leaves `self`.
    pub fn crop<D>(&self, x: usize, y: usize, dest: &mut Tensor3<D>)
    where
        D: AsRef<[f64]> + AsMut<[f64]>,
    {
        assert_eq!(self.depth, dest.depth, "crop: depth mismatch");
        assert!(
            x + dest.width <= self.width && y + dest.height <= self.height,
            "crop: {}x{} window at ({}, {}) exceeds {}x{} tensor",
            dest.width,
            dest.height,
            x,
            y,
            self.width,
            self.height
        );
        let row_len = dest.width * dest.depth;
        if row_len == 0 {
            return;
        }
        let src = self.data.as_ref();
        let dst = dest.data.as_mut();
        for row in 0..dest.height {
            let src_start = self.depth * ((y + row) * self.width + x);
            let dst_start = row * row_len;
            dst[dst_start..dst_start + row_len]
                .copy_from_slice(&src[src_start..src_start + row_len]);
        }
    }
}

impl<S: AsRef<[f64]> + AsMut<[f64]>> Tensor3<S> {
    pub fn data_mut(&mut self) -> &mut [f64] {
        self.data.as_mut()
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f64) {
        let idx = self.index(x, y, z);
        self.data.as_mut()[idx] = value;
    }

    pub fn fill(&mut self, value: f64) {
        self.data.as_mut().fill(value);
    }

    /// Adds `scale * src` into `self`, with `src`'s origin placed at `(x, y)`.
    ///
    /// Offsets may be negative and the two tensors may overlap only partly;
    /// only the overlapping region is touched.
    ///
    /// # Panics
    /// Panics if the depths differ.
    pub fn mul_add<T: AsRef<[f64]>>(&mut self, x: isize, y: isize, src: &Tensor3<T>, scale: f64) {
        assert_eq!(self.depth, src.depth, "mul_add: depth mismatch");

        let x_start = max(0, -x);
        let x_end = min(src.width as isize, self.width as isize - x);
        let y_start = max(0, -y);
        let y_end = min(src.height as isize, self.height as isize - y);
        if x_end <= x_start || y_end <= y_start {
            return;
        }

        let row_len = (x_end - x_start) as usize * self.depth;
        let src_data = src.data.as_ref();
        for src_y in y_start..y_end {
            let dst_y = (src_y + y) as usize;
            let dst_x = (x_start + x) as usize;
            let dst_start = self.depth * (dst_y * self.width + dst_x);
            let src_start = src.depth * (src_y as usize * src.width + x_start as usize);
            ops::axpy(
                &mut self.data.as_mut()[dst_start..dst_start + row_len],
                scale,
                &src_data[src_start..src_start + row_len],
            );
        }
    }
}

#[cfg(test)]
#[path = "tensor3_test.rs"]
mod tests;
