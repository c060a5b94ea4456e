//! 物体検出の結果を処理するモジュール

/// デコード直後のボックス (入力画像座標系の中心・大きさ表現)
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBox {
    /// 中心x
    pub cx: f32,
    /// 中心y
    pub cy: f32,
    /// 幅
    pub w: f32,
    /// 高さ
    pub h: f32,
    /// 物体確率
    pub objectness: f32,
    /// クラス確率
    pub class_scores: Vec<f32>,
}

impl DecodedBox {
    /// 最大のクラス確率を持つクラスIDとその確率を返します。
    /// 同値の場合は先に現れたクラスを選びます。
    pub fn best_class(&self) -> Option<(usize, f32)> {
        self.class_scores
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((i, s)),
            })
    }

    /// 左上・右下座標の表現に変換します。
    ///
    /// # Return
    /// * クラス確率を持たない場合はNone
    pub fn to_corners(&self) -> Option<DetectionData> {
        let (class, class_score) = self.best_class()?;
        Some(DetectionData::from_center(
            self.cx,
            self.cy,
            self.w,
            self.h,
            self.objectness * class_score,
            class,
        ))
    }
}

/// 検出結果を保持するための構造体
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionData {
    /// クラス
    pub class: usize,
    /// バウンディングボックス左上のx
    pub x1: f32,
    /// バウンディングボックス左上のy
    pub y1: f32,
    /// バウンディングボックス右下のx
    pub x2: f32,
    /// バウンディングボックス右下のy
    pub y2: f32,
    /// スコア (物体確率 × クラス確率)
    pub confidence: f32,
}

/// 全スケールを平坦化した候補
pub type FlatBox = DetectionData;
/// 閾値と座標の検査を通過し，元画像の座標系に戻した候補
pub type FilteredBox = DetectionData;
/// NMS後の最終結果
pub type FinalBox = DetectionData;

impl DetectionData {
    /// 中心座標と大きさから新しいDetectionDataを作成します。
    ///
    /// # Args
    /// * `cx`, `cy` - 中心座標
    /// * `w`, `h` - 幅と高さ
    /// * `confidence` - スコア
    /// * `class` - クラスID
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, confidence: f32, class: usize) -> Self {
        Self {
            class,
            x1: cx - w / 2.,
            y1: cy - h / 2.,
            x2: cx + w / 2.,
            y2: cy + h / 2.,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// YOLOの出力した検出結果の座標を元の画像の座標系に戻します。
    ///
    /// # Args
    /// * `lb` - 入力作成時のレターボックス変換
    ///
    /// # Return
    /// * 新たなDetectionDataインスタンス
    pub fn reverse_transform(&self, lb: &Letterbox) -> Self {
        let mut new_d = *self;
        (new_d.x1, new_d.y1) = lb.reverse_point(self.x1, self.y1);
        (new_d.x2, new_d.y2) = lb.reverse_point(self.x2, self.y2);
        new_d
    }
}

/// アスペクト比を保ったまま正方形の入力に収めるための変換
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// 拡大率
    pub ratio: f32,
    /// 左右の余白
    pub pad_w: f32,
    /// 上下の余白
    pub pad_h: f32,
}

impl Letterbox {
    /// 元画像の大きさとモデル入力の大きさから変換を求めます。
    ///
    /// # Args
    /// * `width`, `height` - 元画像の大きさ
    /// * `input_size` - モデル入力の一辺
    pub fn new(width: u32, height: u32, input_size: u32) -> Self {
        let input_size = input_size as f32;
        let wratio = input_size / width as f32;
        let hratio = input_size / height as f32;
        let ratio = f32::min(wratio, hratio);
        let nw = width as f32 * ratio;
        let nh = height as f32 * ratio;

        Self {
            ratio,
            pad_w: (input_size - nw) / 2.,
            pad_h: (input_size - nh) / 2.,
        }
    }

    /// 入力画像上の座標を元画像の座標に戻します。
    pub fn reverse_point(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_w) / self.ratio, (y - self.pad_h) / self.ratio)
    }

    /// 元画像上の座標を入力画像上の座標に変換します。
    #[cfg(test)]
    pub fn forward_point(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.ratio + self.pad_w, y * self.ratio + self.pad_h)
    }
}
