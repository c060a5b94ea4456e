//! 評価処理で発生するエラーを定義するモジュール

use std::path::PathBuf;

use thiserror::Error;

/// 評価処理のエラー
#[derive(Debug, Error)]
pub enum EvalError {
    /// アノテーション行の書式が不正
    #[error("annotation line {line}: {msg}")]
    Parse { line: usize, msg: String },

    /// 設定値やテンソル形状の不整合
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 画像の読み込みに失敗
    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// 推論結果アーカイブの不備
    #[error("prediction archive: {0}")]
    Archive(String),

    #[error("resize failed: {0}")]
    Resize(String),
}

impl EvalError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn parse(line: usize, msg: impl Into<String>) -> Self {
        Self::Parse { line, msg: msg.into() }
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
