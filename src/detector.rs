//! 推論部分を抽象化するモジュール
//!
//! 推論エンジンは [`Detector`] を実装して差し替えます。このクレートには，
//! 事前に記録したモデル出力を再生する [`PredictionArchive`] を用意しています。

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};

use crate::config::AnchorConfig;
use crate::error::{EvalError, Result};
use crate::tensor::{InputTensor, RawPrediction};

/// 前処理済みの画像からスケールごとの出力を得る推論器
pub trait Detector {
    /// 推論を実行します。
    ///
    /// # Args
    /// * `input` - 前処理済みの入力
    ///
    /// # Return
    /// * スケール順に並んだモデル出力
    fn infer(&mut self, input: &InputTensor) -> Result<Vec<RawPrediction>>;

    /// 画像を読めずに推論を飛ばしたことを通知します。
    fn skip(&mut self) {}
}

/// スケールごとの出力の形 (grid, anchors, channels)
fn scale_shapes(
    anchors: &AnchorConfig,
    input_size: u32,
    num_classes: usize,
) -> Result<Vec<(usize, usize, usize)>> {
    (0..anchors.num_scales())
        .map(|s| -> Result<(usize, usize, usize)> {
            Ok((
                anchors.grid_size(s, input_size)?,
                anchors.anchors(s).len(),
                5 + num_classes,
            ))
        })
        .collect()
}

fn entry_name(image_idx: usize, scale: usize) -> String {
    format!("{}/{}.bin", image_idx, scale)
}

fn parse_entry_name(name: &str) -> Option<(usize, usize)> {
    let (image, file) = name.split_once('/')?;
    let scale = file.strip_suffix(".bin")?;
    Some((image.parse().ok()?, scale.parse().ok()?))
}

/// 読み出したエントリ ((画像番号, スケール番号), 値)
type TensorEntry = ((usize, usize), Vec<f32>);

/// アーカイブを先頭から読み，エントリを順に送ります。
fn stream_entries<R: Read>(
    mut archive: tar::Archive<R>,
    tx: &Sender<Result<TensorEntry>>,
) -> Result<()> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        let Some(key) = parse_entry_name(&name) else {
            warn!("ignoring archive entry: {}", name);
            continue;
        };

        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        if buf.len() % 4 != 0 {
            return Err(EvalError::Archive(format!(
                "{}: {} bytes is not a whole number of f32",
                name,
                buf.len()
            )));
        }
        let values: Vec<f32> = buf
            .chunks(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        // 受信側が閉じたら読むのをやめる
        if tx.send(Ok((key, values))).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

/// 記録済みのモデル出力 (`.tar.gz`) を画像順に再生する推論器
///
/// エントリ名は `<画像番号>/<スケール番号>.bin` で，中身はリトルエンディアンのf32列です。
/// エントリは画像番号，スケール番号の昇順に並んでいる必要があります。
/// 読み込みは別スレッドで行い，先読みは1画像分までです。
pub struct PredictionArchive {
    rx: Receiver<Result<TensorEntry>>,
    /// 先に読んでしまった後の画像のエントリ
    pending: Option<TensorEntry>,
    shapes: Vec<(usize, usize, usize)>,
    cursor: usize,
}

impl PredictionArchive {
    /// アーカイブを開き，読み込みを開始します。
    ///
    /// # Args
    /// * `path` - gzip圧縮されたtarアーカイブ
    /// * `anchors` - アンカー設定 (出力の形の決定に使う)
    /// * `input_size` - モデル入力の一辺
    /// * `num_classes` - クラス数
    ///
    /// # 注意
    /// 名前が `<画像番号>/<スケール番号>.bin` でないエントリは警告を出して無視します。
    pub fn open<P: AsRef<Path>>(
        path: P,
        anchors: &AnchorConfig,
        input_size: u32,
        num_classes: usize,
    ) -> Result<Self> {
        let shapes = scale_shapes(anchors, input_size, num_classes)?;
        let file = File::open(path.as_ref())?;
        let archive = tar::Archive::new(GzDecoder::new(file));

        let (tx, rx) = bounded(shapes.len());
        thread::spawn(move || {
            if let Err(e) = stream_entries(archive, &tx) {
                let _ = tx.send(Err(e));
            }
        });
        info!("streaming predictions from {}", path.as_ref().display());

        Ok(Self { rx, pending: None, shapes, cursor: 0 })
    }

    /// 次のエントリ。アーカイブの終わりならNone
    fn next_entry(&mut self) -> Result<Option<TensorEntry>> {
        if let Some(entry) = self.pending.take() {
            return Ok(Some(entry));
        }
        self.rx.recv().ok().transpose()
    }

    /// `key` のエントリを取り出します。それより前の画像のエントリは捨てます。
    fn take(&mut self, key: (usize, usize)) -> Result<Vec<f32>> {
        let name = entry_name(key.0, key.1);
        let missing = || EvalError::Archive(format!("missing entry {}", name));
        loop {
            let Some((k, values)) = self.next_entry()? else {
                return Err(missing());
            };
            if k == key {
                return Ok(values);
            }
            if k.0 < key.0 {
                debug!("dropping entry {}", entry_name(k.0, k.1));
                continue;
            }
            self.pending = Some((k, values));
            return Err(missing());
        }
    }
}

impl Detector for PredictionArchive {
    fn infer(&mut self, _input: &InputTensor) -> Result<Vec<RawPrediction>> {
        let image_idx = self.cursor;
        self.cursor += 1;

        let mut outputs = Vec::with_capacity(self.shapes.len());
        for scale in 0..self.shapes.len() {
            let (grid, anchors, channels) = self.shapes[scale];
            let data = self.take((image_idx, scale))?;
            outputs.push(RawPrediction::new(grid, grid, anchors, channels, data)?);
        }
        debug!("replayed predictions for image {}", image_idx);
        Ok(outputs)
    }

    fn skip(&mut self) {
        self.cursor += 1;
    }
}

/// モデル出力を [`PredictionArchive`] の形式で記録する
pub struct PredictionRecorder {
    builder: tar::Builder<GzEncoder<File>>,
    count: usize,
}

impl PredictionRecorder {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            builder: tar::Builder::new(GzEncoder::new(file, Compression::default())),
            count: 0,
        })
    }

    /// 次の画像の出力を追加します。
    pub fn push(&mut self, outputs: &[RawPrediction]) -> Result<()> {
        for (scale, pred) in outputs.iter().enumerate() {
            let bytes: Vec<u8> = pred.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect();
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            self.builder
                .append_data(&mut header, entry_name(self.count, scale), bytes.as_slice())?;
        }
        self.count += 1;
        Ok(())
    }

    /// アーカイブを閉じます。
    pub fn finish(self) -> Result<()> {
        let mut encoder = self.builder.into_inner()?;
        encoder.flush()?;
        encoder.finish()?;
        Ok(())
    }
}
