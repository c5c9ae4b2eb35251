// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输入预处理: RGBA像素 → NHWC张量
//!
//! 相机图像的裁剪、缩放、旋转由调用方完成, 这里只接收已是
//! `input_size x input_size` 的图像。

use anyhow::{ensure, Result};
use image::RgbaImage;
use ndarray::{Array, Array4, IxDyn};

pub const IMAGE_MEAN: f32 = 0.0;
pub const IMAGE_STD: f32 = 255.0;

/// 转换为 `[1, H, W, 3]` 张量, 每个通道 `(c - IMAGE_MEAN) / IMAGE_STD`, 丢弃alpha
pub fn transform_input(image: &RgbaImage, input_size: u32) -> Result<Array<f32, IxDyn>> {
    let (width, height) = image.dimensions();
    ensure!(
        width == input_size && height == input_size,
        "输入图像尺寸应为 {}x{}, 实际 {}x{}",
        input_size,
        input_size,
        width,
        height
    );

    let mut input = Array4::<f32>::zeros((1, height as usize, width as usize, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, _] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        input[[0, y, x, 0]] = (r as f32 - IMAGE_MEAN) / IMAGE_STD;
        input[[0, y, x, 1]] = (g as f32 - IMAGE_MEAN) / IMAGE_STD;
        input[[0, y, x, 2]] = (b as f32 - IMAGE_MEAN) / IMAGE_STD;
    }

    Ok(input.into_dyn())
}
