//! データセット全体に対して評価を行うモジュール
//!
//! 画像ごとに `ground-truth/<n>.txt` と `predicted/<n>.txt` を書き出します。

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use image::DynamicImage;
use log::{debug, info, warn};
use rusttype::Font;

use crate::annotation::{read_annotations, AnnotationEntry, GroundTruthBox};
use crate::config::EvalConfig;
use crate::decode::BoxDecoder;
use crate::detection_result::FinalBox;
use crate::detector::Detector;
use crate::error::{EvalError, Result};
use crate::img_proc;
use crate::nms::NonMaxSuppressor;
use crate::postprocess::BoxPostprocessor;

/// 評価結果の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalSummary {
    pub images: usize,
    pub skipped: usize,
    pub ground_truth_boxes: usize,
    pub predicted_boxes: usize,
}

/// ディレクトリを空にして作り直します。
fn recreate_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// 評価を行う構造体
pub struct Evaluator<D: Detector> {
    config: EvalConfig,
    detector: D,
    decoder: BoxDecoder,
    postprocessor: BoxPostprocessor,
    nms: NonMaxSuppressor,
    font: Option<Font<'static>>,
}

impl<D: Detector> Evaluator<D> {
    /// 新しい `Evaluator` を作成します。
    ///
    /// # Args
    /// * `config` - 評価の設定
    /// * `detector` - 推論器
    pub fn new(config: EvalConfig, detector: D) -> Result<Self> {
        config.validate()?;

        let decoder = BoxDecoder::new(config.anchors.clone(), config.num_classes());
        let postprocessor = BoxPostprocessor::new(
            config.input_size,
            config.score_threshold,
            config.max_box_scale,
        );
        let nms = NonMaxSuppressor::new(config.iou_threshold, config.nms_method);
        let font = match &config.font_path {
            Some(p) if config.write_image_path.is_some() => Some(img_proc::load_font(p)?),
            _ => None,
        };

        Ok(Self { config, detector, decoder, postprocessor, nms, font })
    }

    fn class_name(&self, class: usize) -> Result<&str> {
        self.config
            .class_names
            .get(class)
            .map(String::as_str)
            .ok_or_else(|| EvalError::config(format!("class index {} has no name", class)))
    }

    /// 1枚の画像に対して検出を行います。
    ///
    /// # Args
    /// * `img` - 元画像
    ///
    /// # Return
    /// * 元画像の座標系での最終結果
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<FinalBox>> {
        let input = img_proc::letterbox(img, self.config.input_size)?;
        let outputs = self.detector.infer(&input)?;
        let flat = self.decoder.decode(&outputs)?;
        let filtered = self.postprocessor.process(&flat, img.width(), img.height());
        Ok(self.nms.suppress(&filtered))
    }

    fn write_ground_truth(&self, path: &Path, boxes: &[GroundTruthBox]) -> Result<()> {
        let mut f = BufWriter::new(File::create(path)?);
        for b in boxes {
            let line = format!("{} {} {} {} {}", self.class_name(b.class)?, b.x1, b.y1, b.x2, b.y2);
            writeln!(f, "{}", line)?;
            debug!("\t{}", line);
        }
        f.flush()?;
        Ok(())
    }

    fn write_predictions(&self, path: &Path, boxes: &[FinalBox]) -> Result<()> {
        let mut f = BufWriter::new(File::create(path)?);
        for d in boxes {
            let line = format!(
                "{} {:.4} {} {} {} {}",
                self.class_name(d.class)?,
                d.confidence,
                d.x1 as i32,
                d.y1 as i32,
                d.x2 as i32,
                d.y2 as i32
            );
            writeln!(f, "{}", line)?;
            debug!("\t{}", line);
        }
        f.flush()?;
        Ok(())
    }

    /// 画像を読み込みます。strictでなければ失敗時にNoneを返します。
    fn open_image(&self, entry: &AnnotationEntry) -> Result<Option<DynamicImage>> {
        match image::open(&entry.image_path) {
            Ok(img) => Ok(Some(img)),
            Err(source) => {
                let err = EvalError::Image { path: entry.image_path.clone(), source };
                if self.config.strict {
                    return Err(err);
                }
                warn!("skipping image: {}", err);
                Ok(None)
            }
        }
    }

    /// 1行分のアノテーションを処理します。
    ///
    /// # Args
    /// * `num` - 出力ファイル名に使う番号
    /// * `entry` - アノテーション
    ///
    /// # Return
    /// * 予測ボックスの数。画像を読めなかった場合はNone
    pub fn evaluate_entry(&mut self, num: usize, entry: &AnnotationEntry) -> Result<Option<usize>> {
        let image_name = entry.image_name();

        info!("=> ground truth of {}:", image_name);
        let gt_path = self.config.ground_truth_dir().join(format!("{}.txt", num));
        self.write_ground_truth(&gt_path, &entry.boxes)?;

        info!("=> predict result of {}:", image_name);
        let pred_path = self.config.predicted_dir().join(format!("{}.txt", num));

        let Some(img) = self.open_image(entry)? else {
            self.detector.skip();
            self.write_predictions(&pred_path, &[])?;
            return Ok(None);
        };

        let boxes = self.detect(&img)?;

        if let Some(dir) = &self.config.write_image_path {
            let mut rgb = img.to_rgb8();
            img_proc::draw_bbox(&mut rgb, &boxes, &self.config.class_names, self.font.as_ref());
            let out = dir.join(&image_name);
            rgb.save(&out)
                .map_err(|source| EvalError::Image { path: out.clone(), source })?;
        }

        self.write_predictions(&pred_path, &boxes)?;
        Ok(Some(boxes.len()))
    }

    /// アノテーションファイルに含まれる全画像を評価します。
    ///
    /// 出力ディレクトリは最初に作り直されます。
    pub fn run<P: AsRef<Path>>(&mut self, annotation_path: P) -> Result<EvalSummary> {
        let entries = read_annotations(annotation_path, self.config.num_classes())?;

        recreate_dir(&self.config.predicted_dir())?;
        recreate_dir(&self.config.ground_truth_dir())?;
        if let Some(dir) = &self.config.write_image_path {
            recreate_dir(dir)?;
        }

        let mut summary = EvalSummary::default();
        for (num, entry) in entries.iter().enumerate() {
            summary.images += 1;
            summary.ground_truth_boxes += entry.boxes.len();
            match self.evaluate_entry(num, entry)? {
                Some(n) => summary.predicted_boxes += n,
                None => summary.skipped += 1,
            }
            info!("{} / {}", num + 1, entries.len());
        }

        info!(
            "evaluated {} images ({} skipped), {} ground truth boxes, {} predictions",
            summary.images, summary.skipped, summary.ground_truth_boxes, summary.predicted_boxes
        );
        Ok(summary)
    }
}
