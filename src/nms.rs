//! クラス別の Non-Maximum Suppression

use std::collections::BTreeMap;

use crate::detection_result::{FilteredBox, FinalBox};
use crate::error::{EvalError, Result};

/// Soft-NMS のスコア減衰の方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoftPenalty {
    /// `exp(-iou^2 / sigma)`
    Gaussian { sigma: f32 },
    /// IoUが閾値以上のとき `1 - iou`
    Linear,
}

/// NMS の方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NmsMethod {
    /// IoUが閾値以上の候補を削除する
    Standard,
    /// 候補のスコアを減衰させ，`min_score` 以下になったものを削除する
    Soft { penalty: SoftPenalty, min_score: f32 },
}

impl NmsMethod {
    /// 既定のガウシアン Soft-NMS (sigma = 0.3)
    pub fn soft_gaussian(sigma: f32) -> Self {
        Self::Soft {
            penalty: SoftPenalty::Gaussian { sigma },
            min_score: 0.,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Standard => Ok(()),
            Self::Soft { penalty, min_score } => {
                if let SoftPenalty::Gaussian { sigma } = penalty {
                    if !(sigma > 0.) {
                        return Err(EvalError::config(format!(
                            "soft-nms sigma must be positive, got {}",
                            sigma
                        )));
                    }
                }
                if !(0.0..1.0).contains(&min_score) {
                    return Err(EvalError::config(format!(
                        "soft-nms min score {} is outside [0, 1)",
                        min_score
                    )));
                }
                Ok(())
            }
        }
    }
}

/// 2つのボックスの Intersection over Union
pub fn iou(a: &FilteredBox, b: &FilteredBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    if ix1 >= ix2 || iy1 >= iy2 {
        return 0.0;
    }
    let inter = (ix2 - ix1) * (iy2 - iy1);
    let union = a.area() + b.area() - inter;
    if union <= 0. {
        return 0.0;
    }
    inter / union
}

/// クラスごとに NMS を適用する
#[derive(Debug, Clone, Copy)]
pub struct NonMaxSuppressor {
    iou_threshold: f32,
    method: NmsMethod,
}

impl NonMaxSuppressor {
    pub fn new(iou_threshold: f32, method: NmsMethod) -> Self {
        Self { iou_threshold, method }
    }

    /// 残りの候補のうちスコアが最大のもののインデックス。同値なら先頭側
    fn argmax(candidates: &[FilteredBox]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
                Some((_, s)) if s >= d.confidence => best,
                _ => Some((i, d.confidence)),
            })
            .map(|(i, _)| i)
    }

    /// 1クラス分の候補に NMS を適用します。
    ///
    /// # Args
    /// * `candidates` - 同じクラスの候補
    ///
    /// # Return
    /// * 選ばれた順に並んだ最終結果
    fn suppress_class(&self, mut candidates: Vec<FilteredBox>) -> Vec<FinalBox> {
        let mut kept = vec![];

        while let Some(best_idx) = Self::argmax(&candidates) {
            let best = candidates.remove(best_idx);
            kept.push(best);

            match self.method {
                NmsMethod::Standard => {
                    candidates.retain(|d| iou(&best, d) < self.iou_threshold);
                }
                NmsMethod::Soft { penalty, min_score } => {
                    for d in candidates.iter_mut() {
                        let overlap = iou(&best, d);
                        let weight = match penalty {
                            SoftPenalty::Gaussian { sigma } => (-(overlap * overlap) / sigma).exp(),
                            SoftPenalty::Linear if overlap >= self.iou_threshold => 1. - overlap,
                            SoftPenalty::Linear => 1.,
                        };
                        d.confidence *= weight;
                    }
                    candidates.retain(|d| d.confidence > min_score);
                }
            }
        }
        kept
    }

    /// 候補をクラス別に分割し，それぞれに NMS を適用します。
    ///
    /// # Args
    /// * `boxes` - 閾値処理済みの候補
    ///
    /// # Return
    /// * クラスIDの昇順に並んだ最終結果
    pub fn suppress(&self, boxes: &[FilteredBox]) -> Vec<FinalBox> {
        // クラス別に分割 (入力順を保つ)
        let mut by_class: BTreeMap<usize, Vec<FilteredBox>> = BTreeMap::new();
        for &d in boxes {
            by_class.entry(d.class).or_default().push(d);
        }

        by_class
            .into_values()
            .flat_map(|cls| self.suppress_class(cls))
            .collect()
    }
}
