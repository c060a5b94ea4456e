//! YOLOに関する画像処理モジュール

use std::num::NonZeroU32;
use std::path::Path;

use color_space::{Hsv, ToRgb};
use fast_image_resize as fr;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use crate::detection_result::FinalBox;
use crate::error::{EvalError, Result};
use crate::tensor::InputTensor;

/// 余白の画素値
const PAD_VALUE: u8 = 128;

fn non_zero(v: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(v).ok_or_else(|| EvalError::Resize("image has zero size".into()))
}

/// RGB画像をバイリニア補間でリサイズします。
fn resize_rgb(img: &RgbImage, dst_w: u32, dst_h: u32) -> Result<RgbImage> {
    let src = fr::Image::from_vec_u8(
        non_zero(img.width())?,
        non_zero(img.height())?,
        img.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| EvalError::Resize(format!("{:?}", e)))?;

    let mut dst = fr::Image::new(non_zero(dst_w)?, non_zero(dst_h)?, src.pixel_type());
    let mut resizer = fr::Resizer::new(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    resizer
        .resize(&src.view(), &mut dst.view_mut())
        .map_err(|e| EvalError::Resize(format!("{:?}", e)))?;

    RgbImage::from_raw(dst_w, dst_h, dst.buffer().to_vec())
        .ok_or_else(|| EvalError::Resize("resized buffer has unexpected length".into()))
}

/// 縮小後の画像の大きさ。小数点以下は切り捨てます。
fn resized_size(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scale = f64::min(size as f64 / width as f64, size as f64 / height as f64);
    let nw = ((width as f64 * scale) as u32).clamp(1, size);
    let nh = ((height as f64 * scale) as u32).clamp(1, size);
    (nw, nh)
}

/// 画像をリサイズし，正方形に整形します。
///
/// # Args
/// * `img` - 入力画像
/// * `size` - 正方形の一辺
///
/// # Return
/// * 余白を灰色 (128) で埋めたRGB画像
pub fn letterbox_img(img: &DynamicImage, size: u32) -> Result<RgbImage> {
    let rgb = img.to_rgb8();
    let (nw, nh) = resized_size(rgb.width(), rgb.height(), size);

    let resized = resize_rgb(&rgb, nw, nh)?;

    let pad_w = (size - nw) / 2;
    let pad_h = (size - nh) / 2;

    let mut new_img = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    for (x, y, &pixel) in resized.enumerate_pixels() {
        new_img.put_pixel(x + pad_w, y + pad_h, pixel);
    }
    Ok(new_img)
}

/// YOLOの入力テンソルを生成します。
///
/// # Args
/// * `img` - 入力画像
/// * `size` - モデル入力の一辺
///
/// # Return
/// * [0, 1] に正規化したHWC順のテンソル
pub fn letterbox(img: &DynamicImage, size: u32) -> Result<InputTensor> {
    let padded = letterbox_img(img, size)?;
    let data = padded.as_raw().iter().map(|&v| f32::from(v) / 255.).collect();
    InputTensor::new(size, data)
}

/// クラスごとの色を返します。色相環を等分した色を使います。
pub fn class_color(class: usize, num_classes: usize) -> Rgb<u8> {
    let hue = 360. * class as f64 / num_classes.max(1) as f64;
    let rgb = Hsv::new(hue, 1., 1.).to_rgb();
    Rgb([
        rgb.r.round().clamp(0., 255.) as u8,
        rgb.g.round().clamp(0., 255.) as u8,
        rgb.b.round().clamp(0., 255.) as u8,
    ])
}

/// ラベル描画用のフォントを読み込みます。
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<Font<'static>> {
    let bytes = std::fs::read(path.as_ref())?;
    Font::try_from_vec(bytes)
        .ok_or_else(|| {
            EvalError::config(format!("{} is not a usable font", path.as_ref().display()))
        })
}

/// 画像上に線を描画します。
///
/// # Args
/// * `img` - 線を描画する画像 (in-place)
/// * `x1`, `y1`, `x2`, `y2` - 線の始点と終点の座標 (水平線か垂直線)
/// * `thickness` - 線の太さ
/// * `color` - 線の色
fn draw_line(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    thickness: f32,
    color: Rgb<u8>,
) {
    let (bx, by) = (x1 - (thickness / 2.).floor(), y1 - (thickness / 2.).floor());

    let (w, h) = if x1 == x2 {
        (thickness, (y2 - y1).abs() + thickness)
    } else {
        ((x2 - x1).abs() + thickness, thickness)
    };

    let rect = Rect::at(bx as i32, by as i32).of_size(w.max(1.) as u32, h.max(1.) as u32);
    draw_filled_rect_mut(img, rect, color);
}

/// 画像上に矩形を描画します。
fn draw_rect(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    thickness: f32,
    color: Rgb<u8>,
) {
    draw_line(img, x1, y1, x1, y2, thickness, color);
    draw_line(img, x1, y2, x2, y2, thickness, color);
    draw_line(img, x1, y1, x2, y1, thickness, color);
    draw_line(img, x2, y1, x2, y2, thickness, color);
}

/// 画像上にラベルを描画します。
///
/// # Args
/// * `img` - ラベルを描画する画像 (in-place)
/// * `x1`, `y1` - ボックスの左上の座標
/// * `line_thickness` - ボックスの枠線の太さ
/// * `bg_color` - ラベルの背景色
/// * `font` - ラベルのフォント
/// * `font_size` - ラベルのフォントサイズ
/// * `text` - ラベルに表示するテキスト
#[allow(clippy::too_many_arguments)]
fn draw_label(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    line_thickness: f32,
    bg_color: Rgb<u8>,
    font: &Font,
    font_size: f32,
    text: &str,
) {
    let label_h = font_size;
    let dx1 = x1 - (line_thickness / 2.).floor();
    // 画像上端にかかる場合はボックスの内側に置く
    let label_y = if y1 - label_h < 0. { y1 } else { y1 - label_h };

    let pad = 6.;
    let scale = Scale::uniform(label_h);
    let (text_w, _) = text_size(scale, font, text);
    let v_metrics = font.v_metrics(scale);
    let text_h = v_metrics.ascent - v_metrics.descent + v_metrics.line_gap;

    let rect = Rect::at(dx1 as i32, label_y as i32)
        .of_size((text_w as f32 + pad * 2.) as u32, label_h as u32);
    draw_filled_rect_mut(img, rect, bg_color);

    let text_y = label_y + (label_h - text_h) / 2.;

    let text_color = if (bg_color[0] as i32 + bg_color[1] as i32 + bg_color[2] as i32) < 382 {
        Rgb([255u8, 255, 255])
    } else {
        Rgb([0u8, 0, 0])
    };
    draw_text_mut(img, text_color, (dx1 + pad) as i32, text_y as i32, scale, font, text);
}

/// 画像上にバウンディングボックスとラベルを描画します。
///
/// # Args
/// * `img` - 描画する画像 (in-place)
/// * `d_result` - 検出結果の配列
/// * `class_names` - クラス名
/// * `font` - ラベルのフォント。Noneなら枠だけ描画する
pub fn draw_bbox(
    img: &mut RgbImage,
    d_result: &[FinalBox],
    class_names: &[String],
    font: Option<&Font>,
) {
    let line_thickness = (0.6 * (img.width() + img.height()) as f32 / 600.).floor().max(1.);
    let font_size = (line_thickness * 10.).max(14.);

    // スコアの高いものを後に描く
    let mut sorted = d_result.to_vec();
    sorted.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    for d in sorted.iter() {
        let color = class_color(d.class, class_names.len());

        let x1 = d.x1.round();
        let y1 = d.y1.round();
        let x2 = d.x2.round();
        let y2 = d.y2.round();

        draw_rect(img, x1, y1, x2, y2, line_thickness, color);

        if let Some(font) = font {
            let name = class_names.get(d.class).map(String::as_str).unwrap_or("?");
            let text = format!("{}: {:.2}", name, d.confidence);
            draw_label(img, x1, y1, line_thickness, color, font, font_size, &text);
        }
    }
}
