//! # YOLOv3 / YOLOv3-Tiny 評価ライブラリ
//!
//! このクレートは、YOLOv3系の物体検出モデルをラベル付きデータセットで評価し、
//! mAP計算用の正解ファイルと予測ファイルを出力するためのRustライブラリです。
//!
//! ## 主な機能
//!
//! 1. **デコード**: モデルの生の出力をバウンディングボックスに変換します。
//! 2. **後処理**: 閾値処理を行い、レターボックス変換を戻して元画像の座標系にします。
//! 3. **NMS**: クラスごとに重複したボックスを取り除きます (通常 / Soft-NMS)。
//! 4. **評価**: アノテーションファイルの全画像を処理し、結果をファイルに書き出します。
//!
//! 推論そのものは [`detector::Detector`] を実装して差し替えます。
//!
//! ## Example
//! ```no_run
//! use yolo_v3_eval::config::{read_class_names, AnchorConfig, EvalConfig};
//! use yolo_v3_eval::detector::PredictionArchive;
//! use yolo_v3_eval::evaluation::Evaluator;
//!
//! let classes = read_class_names("data/classes/coco.names")?;
//! let config = EvalConfig::new(AnchorConfig::yolov3_tiny(), classes);
//! let archive = PredictionArchive::open("preds.tar.gz", &config.anchors, config.input_size, config.num_classes())?;
//! let summary = Evaluator::new(config, archive)?.run("data/dataset/val2017.txt")?;
//! # Ok::<(), yolo_v3_eval::error::EvalError>(())
//! ```

pub mod annotation;
pub mod config;
pub mod decode;
pub mod detection_result;
pub mod detector;
pub mod error;
pub mod evaluation;
pub mod img_proc;
pub mod nms;
pub mod postprocess;
pub mod tensor;
