//! データセットのアノテーションファイルを読み込むモジュール
//!
//! 1行1画像で `<image_path> <xmin,ymin,xmax,ymax,class> ...` の形式です。

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EvalError, Result};

/// 正解ボックス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundTruthBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub class: usize,
}

/// アノテーション1行分
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationEntry {
    pub image_path: PathBuf,
    pub boxes: Vec<GroundTruthBox>,
}

impl AnnotationEntry {
    /// 画像のファイル名
    pub fn image_name(&self) -> String {
        self.image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn parse_box(field: &str, line_no: usize, num_classes: usize) -> Result<GroundTruthBox> {
    let values = field
        .split(',')
        .map(|v| {
            v.parse::<i32>()
                .map_err(|e| EvalError::parse(line_no, format!("invalid box value {:?}: {}", v, e)))
        })
        .collect::<Result<Vec<i32>>>()?;

    let &[x1, y1, x2, y2, class] = values.as_slice() else {
        return Err(EvalError::parse(
            line_no,
            format!("box {:?} has {} fields, expected 5", field, values.len()),
        ));
    };

    if class < 0 || class as usize >= num_classes {
        return Err(EvalError::parse(
            line_no,
            format!("class index {} is outside [0, {})", class, num_classes),
        ));
    }
    Ok(GroundTruthBox { x1, y1, x2, y2, class: class as usize })
}

/// アノテーション1行を解析します。
///
/// # Args
/// * `line` - 解析する行
/// * `line_no` - エラー表示用の行番号 (1始まり)
/// * `num_classes` - クラス数
///
/// # Return
/// * 空行ならNone
pub fn parse_line(
    line: &str,
    line_no: usize,
    num_classes: usize,
) -> Result<Option<AnnotationEntry>> {
    let mut fields = line.split_whitespace();
    let Some(image_path) = fields.next() else {
        return Ok(None);
    };
    let boxes = fields
        .map(|f| parse_box(f, line_no, num_classes))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(AnnotationEntry { image_path: PathBuf::from(image_path), boxes }))
}

/// アノテーションファイル全体を読み込みます。
pub fn read_annotations<P: AsRef<Path>>(
    path: P,
    num_classes: usize,
) -> Result<Vec<AnnotationEntry>> {
    let text = fs::read_to_string(path)?;
    let mut entries = vec![];
    for (i, line) in text.lines().enumerate() {
        if let Some(entry) = parse_line(line, i + 1, num_classes)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}
