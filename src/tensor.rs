//! モデルの入出力テンソル

use crate::error::{EvalError, Result};

/// 前処理済みのモデル入力 (size × size × 3, RGB, [0, 1], HWC)
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub size: u32,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn new(size: u32, data: Vec<f32>) -> Result<Self> {
        let expected = (size * size * 3) as usize;
        if data.len() != expected {
            return Err(EvalError::config(format!(
                "input tensor has {} values, expected {}",
                data.len(),
                expected
            )));
        }
        Ok(Self { size, data })
    }

    /// (x, y) の画素値 [r, g, b]
    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let base = ((y * self.size + x) * 3) as usize;
        &self.data[base..base + 3]
    }
}

/// 1スケール分のモデル出力 `[1, grid_h, grid_w, num_anchors, channels]`
///
/// channels は (dx, dy, dw, dh, objectness, class scores...) の順です。
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    grid_h: usize,
    grid_w: usize,
    num_anchors: usize,
    channels: usize,
    data: Vec<f32>,
}

impl RawPrediction {
    /// 新しいRawPredictionを作成します。
    ///
    /// # Args
    /// * `grid_h`, `grid_w` - グリッドの大きさ
    /// * `num_anchors` - セルあたりのアンカー数
    /// * `channels` - アンカーあたりのチャネル数 (5 + クラス数)
    /// * `data` - 行優先で並んだ値
    pub fn new(
        grid_h: usize,
        grid_w: usize,
        num_anchors: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self> {
        if channels < 5 {
            return Err(EvalError::config(format!(
                "{} channels per anchor, need at least 5",
                channels
            )));
        }
        let expected = grid_h * grid_w * num_anchors * channels;
        if data.len() != expected {
            return Err(EvalError::config(format!(
                "prediction has {} values, shape [1, {}, {}, {}, {}] needs {}",
                data.len(),
                grid_h,
                grid_w,
                num_anchors,
                channels,
                expected
            )));
        }
        Ok(Self { grid_h, grid_w, num_anchors, channels, data })
    }

    pub fn grid_h(&self) -> usize {
        self.grid_h
    }

    pub fn grid_w(&self) -> usize {
        self.grid_w
    }

    pub fn num_anchors(&self) -> usize {
        self.num_anchors
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn num_classes(&self) -> usize {
        self.channels - 5
    }

    /// セル (gx, gy) のアンカー `a` のチャネル列
    pub fn cell(&self, gy: usize, gx: usize, a: usize) -> &[f32] {
        let base = ((gy * self.grid_w + gx) * self.num_anchors + a) * self.channels;
        &self.data[base..base + self.channels]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_is_config_error() {
        assert!(matches!(
            RawPrediction::new(2, 2, 3, 6, vec![0.; 10]),
            Err(EvalError::Config(_))
        ));
        assert!(InputTensor::new(4, vec![0.; 47]).is_err());
    }

    #[test]
    fn cell_indexing_is_row_major() {
        let data: Vec<f32> = (0..2 * 3 * 2 * 6).map(|v| v as f32).collect();
        let p = RawPrediction::new(2, 3, 2, 6, data).unwrap();
        // gy=1, gx=2, a=1 -> ((1*3+2)*2+1)*6 = 66
        assert_eq!(p.cell(1, 2, 1)[0], 66.);
        assert_eq!(p.cell(1, 2, 1).len(), 6);
        assert_eq!(p.num_classes(), 1);
    }
}
