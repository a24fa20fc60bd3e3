//! 学習サンプルのバッファ
//!
//! 撮影したサンプルを追加順に保持します。容量を超えた場合は最も古い
//! サンプルから捨てるため、`append` は失敗しません。

use std::collections::VecDeque;

use crate::types::{EncodedImage, TrainingExample};

#[derive(Debug, Default)]
pub struct TrainingBuffer {
    examples: VecDeque<TrainingExample>,
    capacity: Option<usize>,
    next_seq: u64,
}

impl TrainingBuffer {
    /// 上限なしのバッファ
    pub fn new() -> Self {
        Self::default()
    }

    /// 上限つきのバッファ（0 は 1 として扱う）
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// 末尾に追加し、割り当てた通し番号を返す
    pub fn append(&mut self, image: EncodedImage, label: impl Into<String>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(capacity) = self.capacity {
            while self.examples.len() >= capacity {
                if let Some(evicted) = self.examples.pop_front() {
                    tracing::debug!(
                        "バッファ上限 {} に達したため最古のサンプル #{} を破棄しました",
                        capacity,
                        evicted.seq
                    );
                }
            }
        }

        self.examples.push_back(TrainingExample::new(seq, image, label.into()));
        seq
    }

    /// 追加順の全サンプル（取り出しはしない）
    pub fn contents(&self) -> Vec<TrainingExample> {
        self.examples.iter().cloned().collect()
    }

    /// 通し番号 `seq` 以前のサンプルを削除し、削除件数を返す
    pub fn clear_through(&mut self, seq: u64) -> usize {
        let before = self.examples.len();
        self.examples.retain(|e| e.seq > seq);
        before - self.examples.len()
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}
