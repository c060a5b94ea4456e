//! デコード済みの候補を閾値処理し，元画像の座標系に戻すモジュール

use log::debug;

use crate::detection_result::{FilteredBox, FlatBox, Letterbox};

/// 候補のフィルタと座標変換を行う
#[derive(Debug, Clone, Copy)]
pub struct BoxPostprocessor {
    input_size: u32,
    score_threshold: f32,
    max_box_scale: f32,
}

impl BoxPostprocessor {
    /// 新しい `BoxPostprocessor` を作成します。
    ///
    /// # Args
    /// * `input_size` - モデル入力の一辺
    /// * `score_threshold` - これ未満のスコアの候補を捨てる
    /// * `max_box_scale` - sqrt(面積) の上限
    pub fn new(input_size: u32, score_threshold: f32, max_box_scale: f32) -> Self {
        Self { input_size, score_threshold, max_box_scale }
    }

    /// 1つの候補を処理します。
    ///
    /// # Return
    /// * 条件を満たさない場合はNone
    fn filter_one(
        &self,
        b: &FlatBox,
        lb: &Letterbox,
        width: u32,
        height: u32,
    ) -> Option<FilteredBox> {
        let mut d = b.reverse_transform(lb);

        d.x1 = d.x1.max(0.);
        d.y1 = d.y1.max(0.);
        d.x2 = d.x2.min((width - 1) as f32);
        d.y2 = d.y2.min((height - 1) as f32);
        if d.x1 > d.x2 || d.y1 > d.y2 {
            return None;
        }

        let scale = d.area().sqrt();
        if !(scale > 0. && scale < self.max_box_scale) {
            return None;
        }

        // NaNは比較で弾かれる
        if !(d.confidence >= self.score_threshold) {
            return None;
        }
        Some(d)
    }

    /// 候補を閾値処理し，元画像の座標系に戻します。
    ///
    /// # Args
    /// * `boxes` - デコード済みの候補
    /// * `width`, `height` - 元画像の大きさ
    ///
    /// # Return
    /// * 画像内に収まった候補 (入力順)
    pub fn process(&self, boxes: &[FlatBox], width: u32, height: u32) -> Vec<FilteredBox> {
        if width == 0 || height == 0 {
            return vec![];
        }
        let lb = Letterbox::new(width, height, self.input_size);
        let filtered: Vec<FilteredBox> = boxes
            .iter()
            .filter_map(|b| self.filter_one(b, &lb, width, height))
            .collect();
        debug!("{} of {} candidates passed postprocess", filtered.len(), boxes.len());
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection_result::DetectionData;

    fn boxes() -> Vec<FlatBox> {
        vec![
            DetectionData::from_center(208., 208., 100., 60., 0.9, 0),
            DetectionData::from_center(50., 200., 40., 40., 0.35, 1),
            DetectionData::from_center(400., 20., 80., 80., 0.5, 2),
            DetectionData::from_center(300., 300., 10., 10., 0.1, 0),
            // 上下の余白に完全に収まるボックス
            DetectionData::from_center(200., 30., 20., 20., 0.95, 0),
        ]
    }

    #[test]
    fn outputs_lie_inside_the_image() {
        let pp = BoxPostprocessor::new(416, 0.0, f32::INFINITY);
        let (w, h) = (640, 480);
        for d in pp.process(&boxes(), w, h) {
            assert!(0. <= d.x1 && d.x1 <= d.x2 && d.x2 <= (w - 1) as f32);
            assert!(0. <= d.y1 && d.y1 <= d.y2 && d.y2 <= (h - 1) as f32);
        }
    }

    #[test]
    fn padding_only_boxes_are_dropped() {
        let pp = BoxPostprocessor::new(416, 0.0, f32::INFINITY);
        // 640x480 -> ratio 0.65, pad_h = (416 - 312) / 2 = 52
        let out = pp.process(&boxes(), 640, 480);
        assert!(out.iter().all(|d| d.confidence != 0.95));
    }

    #[test]
    fn threshold_is_monotonic() {
        let lo = BoxPostprocessor::new(416, 0.2, f32::INFINITY).process(&boxes(), 500, 375);
        let hi = BoxPostprocessor::new(416, 0.4, f32::INFINITY).process(&boxes(), 500, 375);
        assert!(hi.len() < lo.len());
        assert!(hi.iter().all(|d| lo.contains(d)));
    }

    #[test]
    fn threshold_is_inclusive() {
        let pp = BoxPostprocessor::new(416, 0.5, f32::INFINITY);
        let out = pp.process(&boxes(), 416, 416);
        assert!(out.iter().any(|d| d.confidence == 0.5));
    }

    #[test]
    fn scale_bound_drops_large_boxes() {
        let pp = BoxPostprocessor::new(416, 0.0, 50.);
        let out = pp.process(&boxes(), 416, 416);
        assert!(out.iter().all(|d| d.area().sqrt() < 50.));
        assert!(!out.is_empty());
    }

    #[test]
    fn square_image_keeps_coordinates() {
        let pp = BoxPostprocessor::new(416, 0.3, f32::INFINITY);
        let input = [DetectionData {
            class: 0,
            x1: 50.,
            y1: 50.,
            x2: 150.,
            y2: 150.,
            confidence: 0.855,
        }];
        assert_eq!(pp.process(&input, 416, 416), input.to_vec());
    }
}
