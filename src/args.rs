//! コマンドライン引数

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use yolo_v3_eval::config::{AnchorConfig, EvalConfig};
use yolo_v3_eval::nms::NmsMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NmsKind {
    Nms,
    SoftNms,
}

/// YOLOv3 の検出結果を mAP 評価用のファイルに書き出す
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// アノテーションファイル (1行1画像)
    #[arg(long, value_name = "FILE", default_value = "./data/dataset/val2017.txt")]
    pub annotation_path: PathBuf,

    /// クラス名ファイル (1行1クラス)
    #[arg(long, value_name = "FILE", default_value = "./data/classes/coco.names")]
    pub classes: PathBuf,

    /// 記録済みのモデル出力 (.tar.gz)
    #[arg(long, value_name = "FILE")]
    pub predictions: PathBuf,

    /// モデル入力の一辺
    #[arg(long, default_value_t = 416)]
    pub size: u32,

    /// YOLOv3 (3スケール) を使う。指定しなければ YOLOv3-Tiny
    #[arg(long)]
    pub full: bool,

    /// スコアの閾値 (0.0 - 1.0)
    #[arg(long, default_value_t = 0.3, value_name = "THRESHOLD")]
    pub score_threshold: f32,

    /// NMS IoU の閾値 (0.0 - 1.0)
    #[arg(long, default_value_t = 0.45, value_name = "THRESHOLD")]
    pub iou_threshold: f32,

    #[arg(long, value_enum, default_value_t = NmsKind::Nms)]
    pub nms_method: NmsKind,

    /// Soft-NMS のガウシアンの sigma
    #[arg(long, default_value_t = 0.3)]
    pub sigma: f32,

    /// `predicted/` と `ground-truth/` を作るディレクトリ
    #[arg(long, value_name = "DIR", default_value = "./mAP")]
    pub output_dir: PathBuf,

    /// 描画済み画像の保存先
    #[arg(long, value_name = "DIR")]
    pub write_image_path: Option<PathBuf>,

    /// ラベル描画用のTTFフォント
    #[arg(long, value_name = "FILE")]
    pub font: Option<PathBuf>,

    /// 画像を読めなかった場合に中断する
    #[arg(long)]
    pub strict: bool,
}

impl Args {
    /// 評価の設定に変換します。
    pub fn to_config(&self, class_names: Vec<String>) -> EvalConfig {
        let anchors = if self.full {
            AnchorConfig::yolov3()
        } else {
            AnchorConfig::yolov3_tiny()
        };
        let mut config = EvalConfig::new(anchors, class_names);
        config.input_size = self.size;
        config.score_threshold = self.score_threshold;
        config.iou_threshold = self.iou_threshold;
        config.nms_method = match self.nms_method {
            NmsKind::Nms => NmsMethod::Standard,
            NmsKind::SoftNms => NmsMethod::soft_gaussian(self.sigma),
        };
        config.output_dir = self.output_dir.clone();
        config.write_image_path = self.write_image_path.clone();
        config.font_path = self.font.clone();
        config.strict = self.strict;
        config
    }
}
