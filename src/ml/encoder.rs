//! 画像のデコードとテンソル化
//!
//! カメラから取得した画像バイト列をデコードし、バイリニア補間で
//! 正方形にリサイズして、分類器入力の [`EncodedImage`] に変換します。

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EncodedImage, ImageHandle};

/// 既定の入力画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 224;

/// ImageNetの平均と標準偏差
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image data is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image decoding was interrupted: {0}")]
    Interrupted(String),
}

/// 画素値の正規化方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// 0.0〜1.0
    #[default]
    UnitRange,
    /// ImageNetの平均・標準偏差で標準化
    Imagenet,
    /// 0〜255 のまま
    Raw,
}

impl Normalization {
    fn apply(self, value: u8, channel: usize) -> f32 {
        match self {
            Normalization::UnitRange => value as f32 / 255.0,
            Normalization::Imagenet => {
                (value as f32 / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
            }
            Normalization::Raw => value as f32,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageEncoder {
    size: usize,
    normalization: Normalization,
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new(IMAGE_SIZE, Normalization::default())
    }
}

impl ImageEncoder {
    pub fn new(size: usize, normalization: Normalization) -> Self {
        Self { size, normalization }
    }

    /// 画像バイト列を (1, size, size, 3) に変換
    pub fn encode(&self, bytes: &[u8]) -> Result<EncodedImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        let side = self.size as u32;
        let resized = if rgb.dimensions() == (side, side) {
            rgb
        } else {
            image::imageops::resize(&rgb, side, side, FilterType::Triangle)
        };

        let data: Vec<f32> = resized
            .as_raw()
            .iter()
            .enumerate()
            .map(|(i, v)| self.normalization.apply(*v, i % EncodedImage::CHANNELS))
            .collect();

        EncodedImage::from_hwc(data, self.size, self.size)
            .ok_or_else(|| DecodeError::Interrupted("resized buffer has unexpected length".into()))
    }

    /// デコードをブロッキングスレッドで実行
    pub async fn encode_async(&self, handle: ImageHandle) -> Result<EncodedImage, DecodeError> {
        let encoder = *self;
        tokio::task::spawn_blocking(move || encoder.encode(&handle.bytes))
            .await
            .map_err(|e| DecodeError::Interrupted(e.to_string()))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// 単色のPNG画像を生成（テスト用）
    pub(crate) fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_encode_resizes_to_model_input() {
        let encoder = ImageEncoder::default();
        let encoded = encoder.encode(&solid_png(320, 240, [255, 0, 0])).unwrap();
        assert_eq!(encoded.shape(), [1, 224, 224, 3]);
        assert_eq!(&encoded.as_slice()[..3], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_normalization_modes() {
        let bytes = solid_png(4, 4, [255, 128, 0]);

        let raw = ImageEncoder::new(4, Normalization::Raw).encode(&bytes).unwrap();
        assert_eq!(&raw.as_slice()[..3], &[255.0, 128.0, 0.0]);

        let imagenet = ImageEncoder::new(4, Normalization::Imagenet)
            .encode(&bytes)
            .unwrap();
        let expected = (1.0 - 0.485) / 0.229;
        assert!((imagenet.as_slice()[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        let encoder = ImageEncoder::default();
        assert!(matches!(encoder.encode(&[]), Err(DecodeError::Empty)));
        assert!(matches!(
            encoder.encode(b"definitely not an image"),
            Err(DecodeError::Image(_))
        ));
    }

    #[tokio::test]
    async fn test_encode_async() {
        let encoder = ImageEncoder::new(8, Normalization::UnitRange);
        let handle = ImageHandle::new(solid_png(16, 16, [0, 0, 255]));
        let encoded = encoder.encode_async(handle).await.unwrap();
        assert_eq!(encoded.shape(), [1, 8, 8, 3]);
        assert_eq!(&encoded.as_slice()[..3], &[0.0, 0.0, 1.0]);
    }
}
