//! 評価に使用する設定を保持するモジュール
//!
//! 設定は構築時に検証され，その後は変更されません。各コンポーネントには構築時に渡します。

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{EvalError, Result};
use crate::nms::NmsMethod;

/// スケールごとのストライドとアンカーボックスの大きさ
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorConfig {
    strides: Vec<u32>,
    /// スケールごとのアンカー (幅, 高さ)。単位は入力画像のピクセル
    anchors: Vec<Vec<[f32; 2]>>,
}

impl AnchorConfig {
    /// 新しいAnchorConfigを作成します。
    ///
    /// # Args
    /// * `strides` - スケールごとのストライド
    /// * `anchors` - スケールごとのアンカーボックス
    ///
    /// # Return
    /// * 検証済みのAnchorConfig
    pub fn new(strides: Vec<u32>, anchors: Vec<Vec<[f32; 2]>>) -> Result<Self> {
        if strides.is_empty() {
            return Err(EvalError::config("at least one detection scale is required"));
        }
        if strides.len() != anchors.len() {
            return Err(EvalError::config(format!(
                "{} strides but {} anchor groups",
                strides.len(),
                anchors.len()
            )));
        }
        if strides.iter().any(|&s| s == 0) {
            return Err(EvalError::config("stride must be positive"));
        }
        for (i, group) in anchors.iter().enumerate() {
            if group.is_empty() {
                return Err(EvalError::config(format!("scale {} has no anchors", i)));
            }
            if group.iter().flatten().any(|v| !(v.is_finite() && *v > 0.)) {
                return Err(EvalError::config(format!("scale {} has a non-positive anchor", i)));
            }
        }
        Ok(Self { strides, anchors })
    }

    /// YOLOv3 (3スケール) の設定
    #[rustfmt::skip]
    pub fn yolov3() -> Self {
        Self {
            strides: vec![8, 16, 32],
            anchors: vec![
                vec![[ 10.,  13.], [ 16.,  30.], [ 33.,  23.]],
                vec![[ 30.,  61.], [ 62.,  45.], [ 59., 119.]],
                vec![[116.,  90.], [156., 198.], [373., 326.]],
            ],
        }
    }

    /// YOLOv3-Tiny (2スケール) の設定
    #[rustfmt::skip]
    pub fn yolov3_tiny() -> Self {
        Self {
            strides: vec![16, 32],
            anchors: vec![
                vec![[ 23.,  27.], [ 37.,  58.], [ 81.,  82.]],
                vec![[ 81.,  82.], [135., 169.], [344., 319.]],
            ],
        }
    }

    pub fn num_scales(&self) -> usize {
        self.strides.len()
    }

    pub fn stride(&self, scale: usize) -> u32 {
        self.strides[scale]
    }

    pub fn anchors(&self, scale: usize) -> &[[f32; 2]] {
        &self.anchors[scale]
    }

    /// 指定したスケールのグリッド数を返します。
    ///
    /// # Args
    /// * `scale` - スケールのインデックス
    /// * `input_size` - モデル入力の一辺のピクセル数
    pub fn grid_size(&self, scale: usize, input_size: u32) -> Result<usize> {
        let stride = self.stride(scale);
        if input_size % stride != 0 {
            return Err(EvalError::config(format!(
                "input size {} is not a multiple of stride {}",
                input_size, stride
            )));
        }
        Ok((input_size / stride) as usize)
    }
}

/// 評価全体の設定
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// モデル入力の一辺 (正方形)
    pub input_size: u32,
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub nms_method: NmsMethod,
    /// sqrt(面積) の上限。これ以上の大きさのボックスは捨てる
    pub max_box_scale: f32,
    pub anchors: AnchorConfig,
    pub class_names: Vec<String>,
    /// `predicted/` と `ground-truth/` を作成するディレクトリ
    pub output_dir: PathBuf,
    /// 描画済み画像の保存先。Noneなら描画しない
    pub write_image_path: Option<PathBuf>,
    /// ラベル描画用のフォント
    pub font_path: Option<PathBuf>,
    /// 画像が読めない場合に評価全体を中断するか
    pub strict: bool,
}

impl EvalConfig {
    /// 既定値で設定を作成します。
    pub fn new(anchors: AnchorConfig, class_names: Vec<String>) -> Self {
        Self {
            input_size: 416,
            score_threshold: 0.3,
            iou_threshold: 0.45,
            nms_method: NmsMethod::Standard,
            max_box_scale: f32::INFINITY,
            anchors,
            class_names,
            output_dir: PathBuf::from("./mAP"),
            write_image_path: None,
            font_path: None,
            strict: false,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// 設定値を検証します。
    pub fn validate(&self) -> Result<()> {
        if self.class_names.is_empty() {
            return Err(EvalError::config("class name list is empty"));
        }
        if self.input_size == 0 {
            return Err(EvalError::config("input size must be positive"));
        }
        for scale in 0..self.anchors.num_scales() {
            self.anchors.grid_size(scale, self.input_size)?;
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(EvalError::config(format!(
                "score threshold {} is outside [0, 1]",
                self.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(EvalError::config(format!(
                "iou threshold {} is outside [0, 1]",
                self.iou_threshold
            )));
        }
        if self.max_box_scale.is_nan() || self.max_box_scale <= 0. {
            return Err(EvalError::config("max box scale must be positive"));
        }
        self.nms_method.validate()
    }

    pub fn predicted_dir(&self) -> PathBuf {
        self.output_dir.join("predicted")
    }

    pub fn ground_truth_dir(&self) -> PathBuf {
        self.output_dir.join("ground-truth")
    }
}

/// クラス名ファイル (1行1クラス) を読み込みます。
///
/// 空行は無視します。
pub fn read_class_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let text = fs::read_to_string(path.as_ref())?;
    let names: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    debug!("{} class names loaded from {}", names.len(), path.as_ref().display());
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_consistent() {
        for cfg in [AnchorConfig::yolov3(), AnchorConfig::yolov3_tiny()] {
            let rebuilt = AnchorConfig::new(cfg.strides.clone(), cfg.anchors.clone()).unwrap();
            assert_eq!(rebuilt, cfg);
        }
        assert_eq!(AnchorConfig::yolov3_tiny().grid_size(0, 416).unwrap(), 26);
        assert_eq!(AnchorConfig::yolov3_tiny().grid_size(1, 416).unwrap(), 13);
    }

    #[test]
    fn mismatched_anchor_groups_are_rejected() {
        let err = AnchorConfig::new(vec![16, 32], vec![vec![[10., 10.]]]).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn input_size_must_divide_by_stride() {
        let mut cfg = EvalConfig::new(AnchorConfig::yolov3(), vec!["person".into()]);
        cfg.input_size = 420;
        assert!(cfg.validate().is_err());
        cfg.input_size = 416;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn thresholds_are_checked() {
        let mut cfg = EvalConfig::new(AnchorConfig::yolov3_tiny(), vec!["person".into()]);
        cfg.score_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn class_names_skip_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coco.names");
        fs::write(&path, "person\nbicycle\n\ncar\n").unwrap();
        assert_eq!(read_class_names(&path).unwrap(), vec!["person", "bicycle", "car"]);
    }
}
