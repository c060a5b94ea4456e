//! YOLOの生の出力をバウンディングボックスに変換するモジュール

use log::debug;

use crate::config::AnchorConfig;
use crate::detection_result::{DecodedBox, FlatBox};
use crate::error::{EvalError, Result};
use crate::tensor::RawPrediction;

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

/// 各スケールの出力をデコードする
#[derive(Debug, Clone)]
pub struct BoxDecoder {
    anchors: AnchorConfig,
    num_classes: usize,
}

impl BoxDecoder {
    pub fn new(anchors: AnchorConfig, num_classes: usize) -> Self {
        Self { anchors, num_classes }
    }

    fn check_shape(&self, scale: usize, pred: &RawPrediction) -> Result<()> {
        let n_anchors = self.anchors.anchors(scale).len();
        if pred.num_anchors() != n_anchors {
            return Err(EvalError::config(format!(
                "scale {}: prediction has {} anchors, config has {}",
                scale,
                pred.num_anchors(),
                n_anchors
            )));
        }
        if pred.channels() != 5 + self.num_classes {
            return Err(EvalError::config(format!(
                "scale {}: prediction has {} channels, expected {} (5 + {} classes)",
                scale,
                pred.channels(),
                5 + self.num_classes,
                self.num_classes
            )));
        }
        Ok(())
    }

    /// 1スケール分の出力をデコードします。
    ///
    /// 中心は `(sigmoid(d) + grid) * stride`，大きさは `exp(d) * anchor` です。
    /// 大きさにはストライドを掛けません (アンカーがピクセル単位のため)。
    ///
    /// # Args
    /// * `scale` - スケールのインデックス
    /// * `pred` - そのスケールの出力
    ///
    /// # Return
    /// * 行 → 列 → アンカーの順に並んだDecodedBox
    pub fn decode_scale(&self, scale: usize, pred: &RawPrediction) -> Result<Vec<DecodedBox>> {
        if scale >= self.anchors.num_scales() {
            return Err(EvalError::config(format!("no anchors configured for scale {}", scale)));
        }
        self.check_shape(scale, pred)?;

        let stride = self.anchors.stride(scale) as f32;
        let anchors = self.anchors.anchors(scale);
        let mut boxes = Vec::with_capacity(pred.grid_h() * pred.grid_w() * anchors.len());

        for gy in 0..pred.grid_h() {
            for gx in 0..pred.grid_w() {
                for (a, ab) in anchors.iter().enumerate() {
                    let c = pred.cell(gy, gx, a);
                    boxes.push(DecodedBox {
                        cx: (sigmoid(c[0]) + gx as f32) * stride,
                        cy: (sigmoid(c[1]) + gy as f32) * stride,
                        w: c[2].exp() * ab[0],
                        h: c[3].exp() * ab[1],
                        objectness: c[4],
                        class_scores: c[5..].to_vec(),
                    });
                }
            }
        }
        Ok(boxes)
    }

    /// 全スケールの出力をデコードし，1つの列に結合します。
    ///
    /// # Args
    /// * `preds` - スケール順に並んだ出力
    ///
    /// # Return
    /// * 角座標に変換したFlatBoxの列 (スケール順)
    pub fn decode(&self, preds: &[RawPrediction]) -> Result<Vec<FlatBox>> {
        if preds.len() != self.anchors.num_scales() {
            return Err(EvalError::config(format!(
                "model returned {} outputs, {} scales configured",
                preds.len(),
                self.anchors.num_scales()
            )));
        }

        let mut flat = vec![];
        for (scale, pred) in preds.iter().enumerate() {
            let decoded = self.decode_scale(scale, pred)?;
            flat.extend(decoded.iter().filter_map(DecodedBox::to_corners));
        }
        debug!("decoded {} candidate boxes", flat.len());
        Ok(flat)
    }
}
