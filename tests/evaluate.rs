use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};

use yolo_v3_eval::config::{AnchorConfig, EvalConfig};
use yolo_v3_eval::detector::{Detector, PredictionArchive, PredictionRecorder};
use yolo_v3_eval::error::{EvalError, Result};
use yolo_v3_eval::evaluation::{EvalSummary, Evaluator};
use yolo_v3_eval::nms::NmsMethod;
use yolo_v3_eval::tensor::{InputTensor, RawPrediction};

const GRID: usize = 52;
const CHANNELS: usize = 7;

/// ストライド8，アンカー100x100 の1スケール
fn anchors() -> AnchorConfig {
    AnchorConfig::new(vec![8], vec![vec![[100., 100.]]]).unwrap()
}

/// 入力画像上で (100, 100) を中心とする 100x100 の person を1つだけ出す出力
fn person_prediction() -> RawPrediction {
    let mut data = vec![0.; GRID * GRID * CHANNELS];
    // (0.5 + 12) * 8 = 100
    let base = (12 * GRID + 12) * CHANNELS;
    data[base..base + CHANNELS].copy_from_slice(&[0., 0., 0., 0., 0.9, 0.95, 0.1]);
    RawPrediction::new(GRID, GRID, 1, CHANNELS, data).unwrap()
}

struct FixedDetector {
    output: RawPrediction,
    calls: usize,
    skips: usize,
}

impl Detector for FixedDetector {
    fn infer(&mut self, input: &InputTensor) -> Result<Vec<RawPrediction>> {
        assert_eq!(input.size, 416);
        self.calls += 1;
        Ok(vec![self.output.clone()])
    }

    fn skip(&mut self) {
        self.skips += 1;
    }
}

fn write_image(path: &Path, w: u32, h: u32) {
    RgbImage::from_pixel(w, h, Rgb([90, 120, 150])).save(path).unwrap();
}

fn config(out: &Path) -> EvalConfig {
    let mut cfg = EvalConfig::new(anchors(), vec!["person".into(), "car".into()]);
    cfg.output_dir = out.to_path_buf();
    cfg
}

#[test]
fn writes_ground_truth_and_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let img_path = dir.path().join("street.png");
    write_image(&img_path, 416, 416);

    let ann = dir.path().join("val.txt");
    fs::write(
        &ann,
        format!("{} 50,50,150,150,0\n{}\n", img_path.display(), img_path.display()),
    )
    .unwrap();

    let out = dir.path().join("mAP");
    // 前回の結果は消される
    fs::create_dir_all(out.join("predicted")).unwrap();
    fs::write(out.join("predicted").join("99.txt"), "stale").unwrap();

    let detector = FixedDetector { output: person_prediction(), calls: 0, skips: 0 };
    let mut evaluator = Evaluator::new(config(&out), detector).unwrap();
    let summary = evaluator.run(&ann).unwrap();

    assert_eq!(
        summary,
        EvalSummary { images: 2, skipped: 0, ground_truth_boxes: 1, predicted_boxes: 2 }
    );
    assert_eq!(
        fs::read_to_string(out.join("ground-truth/0.txt")).unwrap(),
        "person 50 50 150 150\n"
    );
    assert_eq!(
        fs::read_to_string(out.join("predicted/0.txt")).unwrap(),
        "person 0.8550 50 50 150 150\n"
    );
    // 正解ボックスのない行は空のファイルになる
    assert_eq!(fs::read_to_string(out.join("ground-truth/1.txt")).unwrap(), "");
    assert!(!out.join("predicted/99.txt").exists());
}

#[test]
fn letterboxed_image_maps_back_to_original_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let img_path = dir.path().join("wide.png");
    // ratio 0.5, 上下に104pxの余白
    write_image(&img_path, 832, 416);

    let detector = FixedDetector { output: person_prediction(), calls: 0, skips: 0 };
    let mut evaluator = Evaluator::new(config(dir.path()), detector).unwrap();
    let boxes = evaluator.detect(&image::open(&img_path).unwrap()).unwrap();

    assert_eq!(boxes.len(), 1);
    let b = boxes[0];
    assert!((b.x1 - 100.).abs() < 1e-3 && (b.x2 - 300.).abs() < 1e-3);
    // 上端 (50 - 104) / 0.5 は負なので0に切り詰める
    assert_eq!(b.y1, 0.);
    assert!((b.y2 - 92.).abs() < 1e-3);
}

#[test]
fn unreadable_image_is_skipped_unless_strict() {
    let dir = tempfile::tempdir().unwrap();
    let ann = dir.path().join("val.txt");
    fs::write(&ann, "missing.jpg 1,2,3,4,1\n").unwrap();
    let out = dir.path().join("mAP");

    let detector = FixedDetector { output: person_prediction(), calls: 0, skips: 0 };
    let mut evaluator = Evaluator::new(config(&out), detector).unwrap();
    let summary = evaluator.run(&ann).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(fs::read_to_string(out.join("ground-truth/0.txt")).unwrap(), "car 1 2 3 4\n");
    assert_eq!(fs::read_to_string(out.join("predicted/0.txt")).unwrap(), "");

    let mut cfg = config(&out);
    cfg.strict = true;
    let detector = FixedDetector { output: person_prediction(), calls: 0, skips: 0 };
    let err = Evaluator::new(cfg, detector).unwrap().run(&ann).unwrap_err();
    assert!(matches!(err, EvalError::Image { .. }));
}

#[test]
fn malformed_annotation_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let ann = dir.path().join("val.txt");
    fs::write(&ann, "a.jpg 1,2,3,4,0\nb.jpg 1,2,3\n").unwrap();

    let detector = FixedDetector { output: person_prediction(), calls: 0, skips: 0 };
    let err = Evaluator::new(config(&dir.path().join("mAP")), detector)
        .unwrap()
        .run(&ann)
        .unwrap_err();
    assert!(matches!(err, EvalError::Parse { line: 2, .. }));
}

#[test]
fn annotated_images_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let img_path = dir.path().join("frame.png");
    write_image(&img_path, 416, 416);
    let ann = dir.path().join("val.txt");
    fs::write(&ann, format!("{}\n", img_path.display())).unwrap();

    let mut cfg = config(&dir.path().join("mAP"));
    cfg.write_image_path = Some(dir.path().join("detection"));
    cfg.nms_method = NmsMethod::soft_gaussian(0.3);

    let detector = FixedDetector { output: person_prediction(), calls: 0, skips: 0 };
    Evaluator::new(cfg, detector).unwrap().run(&ann).unwrap();

    let drawn = image::open(dir.path().join("detection/frame.png")).unwrap().to_rgb8();
    // person (クラス0) は赤で描かれる
    assert_eq!(*drawn.get_pixel(50, 100), Rgb([255, 0, 0]));
    assert_eq!(*drawn.get_pixel(100, 100), Rgb([90, 120, 150]));
}

#[test]
fn runs_from_a_recorded_archive() {
    let dir = tempfile::tempdir().unwrap();
    let img_path = dir.path().join("street.png");
    write_image(&img_path, 416, 416);
    let ann = dir.path().join("val.txt");
    fs::write(
        &ann,
        format!("{}\nmissing.png\n{}\n", img_path.display(), img_path.display()),
    )
    .unwrap();

    let archive_path = dir.path().join("preds.tar.gz");
    let empty =
        RawPrediction::new(GRID, GRID, 1, CHANNELS, vec![0.; GRID * GRID * CHANNELS]).unwrap();
    let mut rec = PredictionRecorder::create(&archive_path).unwrap();
    rec.push(&[empty.clone()]).unwrap();
    rec.push(&[empty]).unwrap();
    rec.push(&[person_prediction()]).unwrap();
    rec.finish().unwrap();

    let out = dir.path().join("mAP");
    let cfg = config(&out);
    let archive =
        PredictionArchive::open(&archive_path, &cfg.anchors, cfg.input_size, cfg.num_classes())
            .unwrap();
    let summary = Evaluator::new(cfg, archive).unwrap().run(&ann).unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(fs::read_to_string(out.join("predicted/0.txt")).unwrap(), "");
    assert_eq!(
        fs::read_to_string(out.join("predicted/2.txt")).unwrap(),
        "person 0.8550 50 50 150 150\n"
    );
}
