// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/frame.rs - 帧与像素坐标定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 像素通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  Bgr,
}

/// 一帧解码后的 RGB 图像
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
  image: RgbImage,
}

impl Frame {
  pub fn new(image: RgbImage) -> Self {
    Self { image }
  }

  /// 空帧：输入源短暂无数据时返回
  pub fn empty() -> Self {
    Self {
      image: RgbImage::new(0, 0),
    }
  }

  /// 由带行跨度的打包像素缓冲区构造帧，BGR 会转换为 RGB
  pub fn from_packed_rows(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    order: ChannelOrder,
  ) -> Option<Self> {
    let row_bytes = width as usize * RGB_CHANNELS;
    if stride < row_bytes {
      return None;
    }
    let needed = match height as usize {
      0 => 0,
      h => (h - 1) * stride + row_bytes,
    };
    if data.len() < needed {
      return None;
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in data.chunks(stride).take(height as usize) {
      let row = &row[..row_bytes];
      match order {
        ChannelOrder::Rgb => pixels.extend_from_slice(row),
        ChannelOrder::Bgr => {
          for px in row.chunks_exact(RGB_CHANNELS) {
            pixels.extend_from_slice(&[px[2], px[1], px[0]]);
          }
        }
      }
    }

    RgbImage::from_raw(width, height, pixels).map(Frame::new)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn is_empty(&self) -> bool {
    self.image.width() == 0 || self.image.height() == 0
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::new(image)
  }
}

/// 一帧图像编码后的字节，离开作用域即释放
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
  bytes: Box<[u8]>,
}

impl EncodedImage {
  pub fn new(bytes: Vec<u8>) -> Self {
    Self {
      bytes: bytes.into_boxed_slice(),
    }
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
}

/// 像素坐标下的矩形，不保证 x1 < x2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl PixelRect {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn top_left(&self) -> Point {
    Point {
      x: self.x1,
      y: self.y1,
    }
  }

  /// 交换倒置的角点，得到 x1 <= x2, y1 <= y2 的矩形
  pub fn ordered(&self) -> PixelRect {
    PixelRect {
      x1: self.x1.min(self.x2),
      y1: self.y1.min(self.y2),
      x2: self.x1.max(self.x2),
      y2: self.y1.max(self.y2),
    }
  }

  pub fn width(&self) -> i32 {
    self.x2.saturating_sub(self.x1)
  }

  pub fn height(&self) -> i32 {
    self.y2.saturating_sub(self.y1)
  }

  /// 把角点限制在 `[0, width] x [0, height]` 内，用于绘制
  pub fn clamped(&self, width: u32, height: u32) -> PixelRect {
    let (w, h) = (width.min(i32::MAX as u32) as i32, height.min(i32::MAX as u32) as i32);
    PixelRect {
      x1: self.x1.clamp(0, w),
      y1: self.y1.clamp(0, h),
      x2: self.x2.clamp(0, w),
      y2: self.y2.clamp(0, h),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
  pub x: i32,
  pub y: i32,
}

impl Point {
  pub fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }

  pub fn offset(&self, dx: i32, dy: i32) -> Point {
    Point {
      x: self.x.saturating_add(dx),
      y: self.y.saturating_add(dy),
    }
  }
}
