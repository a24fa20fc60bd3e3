//! 計算バックエンドの型定義
//!
//! 推論は NdArray (CPU)、学習はそれを Autodiff でラップしたものを使います。

use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};

pub type InferenceBackend = NdArray<f32>;
pub type TrainingBackend = Autodiff<InferenceBackend>;
pub type Device = NdArrayDevice;

pub fn default_device() -> Device {
    NdArrayDevice::Cpu
}
