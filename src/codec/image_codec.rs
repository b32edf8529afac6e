// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/codec/image_codec.rs - 基于 image/imageproc 的编码与绘制
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

use std::{
  io::Cursor,
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::ImageFormat;
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::{debug, info, warn};

use crate::{
  codec::{CodecError, Color, FrameCodec},
  frame::{EncodedImage, Frame, PixelRect, Point},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;

// 默认字体
const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

// 未指定字体时依次尝试的系统字体
const SYSTEM_FONT_PATHS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/Library/Fonts/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// BMP 编码，imageproc 绘制
#[derive(Clone)]
pub struct ImageCodec {
  font: Option<FontArc>,
  font_size: f32,
  missing_font_reported: Arc<AtomicBool>,
}

impl Default for ImageCodec {
  fn default() -> Self {
    Self::new()
  }
}

impl ImageCodec {
  /// 不带字体：只绘制检测框
  pub fn new() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      missing_font_reported: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, CodecError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| CodecError::FontError(format!("{}: {}", path.display(), e)))?;
    info!("加载字体: {}", path.display());
    Ok(Self::new().with_font(font))
  }

  /// 随程序打包的字体（DejaVu Sans）
  pub fn with_embedded_font() -> Result<Self, CodecError> {
    let font = FontArc::try_from_slice(EMBEDDED_FONT)
      .map_err(|e| CodecError::FontError(format!("embedded font: {}", e)))?;
    Ok(Self::new().with_font(font))
  }

  /// 依次尝试常见的系统字体和内置字体
  pub fn with_default_font() -> Self {
    for path in SYSTEM_FONT_PATHS {
      if Path::new(path).exists() {
        match Self::from_font_file(path) {
          Ok(codec) => return codec,
          Err(e) => debug!("字体不可用 {}: {}", path, e),
        }
      }
    }
    match Self::with_embedded_font() {
      Ok(codec) => {
        info!("使用内置字体");
        codec
      }
      Err(e) => {
        warn!("未找到可用字体，标签文字将不会绘制: {}", e);
        Self::new()
      }
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }
}

impl FrameCodec for ImageCodec {
  fn encode(&self, frame: &Frame) -> Result<EncodedImage, CodecError> {
    if frame.is_empty() {
      return Err(CodecError::EmptyFrame);
    }

    let image = frame.image();
    // BMP 头 54 字节，每行按 4 字节对齐
    let row = (image.width() as usize * 3).div_ceil(4) * 4;
    let mut buffer = Cursor::new(Vec::with_capacity(54 + row * image.height() as usize));
    image.write_to(&mut buffer, ImageFormat::Bmp)?;

    Ok(EncodedImage::new(buffer.into_inner()))
  }

  fn draw_box(&self, frame: &mut Frame, rect: PixelRect, color: Color, thickness: u32) {
    // 只在画面内绘制，检测结果本身不裁剪
    let rect = rect.ordered().clamped(frame.width(), frame.height());
    let image = frame.image_mut();

    for t in 0..thickness.min(i32::MAX as u32) as i32 {
      let inset = t.saturating_mul(2);
      let width = rect.width().saturating_sub(inset);
      let height = rect.height().saturating_sub(inset);
      if width <= 0 || height <= 0 {
        break;
      }
      let r = Rect::at(rect.x1.saturating_add(t), rect.y1.saturating_add(t))
        .of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, r, color);
    }
  }

  fn draw_label(&self, frame: &mut Frame, text: &str, point: Point, color: Color, thickness: u32) {
    let Some(font) = &self.font else {
      if !self.missing_font_reported.swap(true, Ordering::Relaxed) {
        warn!("没有加载字体，跳过标签绘制: {}", text);
      }
      return;
    };

    let scale = PxScale::from(self.font_size);
    // point 是基线位置，imageproc 以文字顶部定位
    let ascent = font.as_scaled(scale).ascent();
    let top = point.y.saturating_sub(ascent.round() as i32);

    // 文字完全落在画面外时不绘制
    let extent = (self.font_size.ceil() as i32 + 1).saturating_mul(text.chars().count() as i32 + 1);
    let (width, height) = (frame.width() as i32, frame.height() as i32);
    if point.x >= width || top >= height || point.x < -extent || top < -extent {
      debug!("标签超出画面，跳过: {} at ({}, {})", text, point.x, point.y);
      return;
    }

    let image = frame.image_mut();
    for dx in 0..thickness.clamp(1, 8) as i32 {
      draw_text_mut(image, color, point.x.saturating_add(dx), top, scale, font, text);
    }
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;
  use crate::codec::{OVERLAY_COLOR, OVERLAY_THICKNESS};

  fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
    Frame::new(RgbImage::from_pixel(width, height, Rgb(rgb)))
  }

  #[test]
  fn test_encode_is_bmp_and_deterministic() {
    let codec = ImageCodec::new();
    let frame = solid_frame(7, 5, [10, 20, 30]);
    let first = codec.encode(&frame).unwrap();
    let second = codec.encode(&frame).unwrap();
    assert_eq!(&first.as_bytes()[..2], b"BM");
    assert_eq!(first, second);

    let decoded = image::load_from_memory_with_format(first.as_bytes(), ImageFormat::Bmp)
      .unwrap()
      .to_rgb8();
    assert_eq!(decoded.dimensions(), (7, 5));
    assert_eq!(decoded.get_pixel(3, 2).0, [10, 20, 30]);
  }

  #[test]
  fn test_encode_empty_frame_fails() {
    assert!(matches!(
      ImageCodec::new().encode(&Frame::empty()),
      Err(CodecError::EmptyFrame)
    ));
  }

  #[test]
  fn test_draw_box_marks_edges_in_place() {
    let codec = ImageCodec::new();
    let mut frame = solid_frame(20, 20, [0, 0, 0]);
    let before = frame.image().as_ptr();
    codec.draw_box(
      &mut frame,
      PixelRect::new(2, 3, 12, 15),
      OVERLAY_COLOR,
      OVERLAY_THICKNESS,
    );
    assert_eq!(frame.image().as_ptr(), before);

    let image = frame.image();
    assert_eq!(*image.get_pixel(2, 3), OVERLAY_COLOR);
    assert_eq!(*image.get_pixel(11, 14), OVERLAY_COLOR);
    assert_eq!(*image.get_pixel(3, 4), OVERLAY_COLOR);
    assert_eq!(*image.get_pixel(7, 9), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(13, 3), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_draw_box_handles_inverted_and_degenerate() {
    let codec = ImageCodec::new();
    let mut frame = solid_frame(10, 10, [0, 0, 0]);
    codec.draw_box(&mut frame, PixelRect::new(8, 8, 2, 2), OVERLAY_COLOR, 1);
    assert_eq!(*frame.image().get_pixel(2, 2), OVERLAY_COLOR);

    let mut frame = solid_frame(10, 10, [0, 0, 0]);
    codec.draw_box(&mut frame, PixelRect::new(4, 4, 4, 9), OVERLAY_COLOR, 2);
    assert!(frame.image().pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn test_draw_label_without_font_is_noop() {
    let codec = ImageCodec::new();
    let mut frame = solid_frame(30, 30, [0, 0, 0]);
    codec.draw_label(&mut frame, "car (90%)", Point::new(10, 25), OVERLAY_COLOR, 2);
    assert!(frame.image().pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn test_embedded_font_loads() {
    assert!(ImageCodec::with_embedded_font().unwrap().has_font());
    assert!(ImageCodec::with_default_font().has_font());
  }

  #[test]
  fn test_draw_label_marks_text_above_baseline() {
    let codec = ImageCodec::with_embedded_font().unwrap();
    let mut frame = solid_frame(200, 60, [0, 0, 0]);
    let point = Point::new(10, 40);
    codec.draw_label(&mut frame, "car (90%)", point, OVERLAY_COLOR, 1);

    let font = FontArc::try_from_slice(EMBEDDED_FONT).unwrap();
    let ascent = font.as_scaled(PxScale::from(LABEL_FONT_SIZE)).ascent().round() as u32;
    let top = point.y as u32 - ascent;

    let marked: Vec<(u32, u32)> = frame
      .image()
      .enumerate_pixels()
      .filter(|(_, _, p)| **p != Rgb([0, 0, 0]))
      .map(|(x, y, _)| (x, y))
      .collect();
    assert!(!marked.is_empty());
    assert!(marked.iter().all(|&(x, y)| x >= point.x as u32 && y >= top));
    assert!(
      marked
        .iter()
        .any(|&(_, y)| y >= top && y < point.y as u32)
    );
  }

  #[test]
  fn test_far_outside_overlay_is_skipped() {
    let codec = ImageCodec::with_embedded_font().unwrap();
    let mut frame = solid_frame(10, 10, [0, 0, 0]);
    codec.draw_label(
      &mut frame,
      "person (90%)",
      Point::new(i32::MIN + 10, i32::MIN),
      OVERLAY_COLOR,
      2,
    );
    assert!(frame.image().pixels().all(|p| *p == Rgb([0, 0, 0])));

    codec.draw_box(
      &mut frame,
      PixelRect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX),
      OVERLAY_COLOR,
      2,
    );
    assert_eq!(*frame.image().get_pixel(0, 0), OVERLAY_COLOR);
    assert_eq!(*frame.image().get_pixel(9, 9), OVERLAY_COLOR);
    assert_eq!(*frame.image().get_pixel(5, 5), Rgb([0, 0, 0]));
  }
}
