// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{VisionError, VisionResult};

/// A single image stored channel-major (CHW) as `f32`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Validate and wrap a flattened CHW buffer.
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> VisionResult<Self> {
        if channels == 0 || height == 0 || width == 0 {
            return Err(VisionError::InvalidArgument(format!(
                "image dimensions must be > 0, got {channels}x{height}x{width}"
            )));
        }
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(VisionError::Shape(format!(
                "image data length {} does not match {channels}x{height}x{width}",
                data.len()
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Image filled with a constant value.
    pub fn filled(channels: usize, height: usize, width: usize, value: f32) -> VisionResult<Self> {
        Self::new(channels, height, width, vec![value; channels * height * width])
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Shape as `(channels, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    /// Immutable view over the CHW buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view over the CHW buffer.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Pixel accessor.
    pub fn get(&self, channel: usize, y: usize, x: usize) -> VisionResult<f32> {
        self.offset(channel, y, x).map(|index| self.data[index])
    }

    /// Pixel mutator.
    pub fn set(&mut self, channel: usize, y: usize, x: usize, value: f32) -> VisionResult<()> {
        let index = self.offset(channel, y, x)?;
        self.data[index] = value;
        Ok(())
    }

    fn offset(&self, channel: usize, y: usize, x: usize) -> VisionResult<usize> {
        if channel >= self.channels || y >= self.height || x >= self.width {
            return Err(VisionError::InvalidArgument(format!(
                "pixel ({channel}, {y}, {x}) outside {}x{}x{}",
                self.channels, self.height, self.width
            )));
        }
        Ok((channel * self.height + y) * self.width + x)
    }

    /// Replace the image contents with a same-shape buffer.
    pub(crate) fn replace_data(&mut self, data: Vec<f32>) -> VisionResult<()> {
        if data.len() != self.data.len() {
            return Err(VisionError::Shape(format!(
                "replacement buffer length {} does not match {}",
                data.len(),
                self.data.len()
            )));
        }
        self.data = data;
        Ok(())
    }

    /// Shrink the image to a crop window. Bounds must fit inside the image.
    pub(crate) fn crop(
        &mut self,
        top: usize,
        left: usize,
        out_height: usize,
        out_width: usize,
    ) -> VisionResult<()> {
        if out_height == 0 || out_width == 0 {
            return Err(VisionError::InvalidArgument(
                "crop window must be > 0".to_string(),
            ));
        }
        if top + out_height > self.height || left + out_width > self.width {
            return Err(VisionError::Shape(format!(
                "crop {out_height}x{out_width}@({top}, {left}) exceeds {}x{}",
                self.height, self.width
            )));
        }
        let mut data = Vec::with_capacity(self.channels * out_height * out_width);
        for channel in 0..self.channels {
            for y in 0..out_height {
                let row_start = (channel * self.height + top + y) * self.width + left;
                data.extend_from_slice(&self.data[row_start..row_start + out_width]);
            }
        }
        self.data = data;
        self.height = out_height;
        self.width = out_width;
        Ok(())
    }
}
