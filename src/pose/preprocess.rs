use anyhow::Result;
use ndarray::Array4;
use opencv::{
    core::{AlgorithmHint, Mat, Size, Vec3f, CV_32FC3},
    imgproc,
    prelude::*,
};

use crate::config::ModelConfig;
use crate::stage::Preprocessor;

/// OpenCV Mat をモデル入力テンソルに変換
///
/// - 入力サイズにリサイズ
/// - BGR -> RGB
/// - [1, H, W, 3] の f32 テンソルに変換 (-1.0〜1.0)
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    width: i32,
    height: i32,
}

impl ImagePreprocessor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as i32,
            height: height as i32,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.input_width, config.input_height)
    }

    pub fn preprocess(&self, frame: &Mat) -> Result<Array4<f32>> {
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(self.width, self.height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb, imgproc::COLOR_BGR2RGB, 0, AlgorithmHint::ALGO_HINT_DEFAULT)?;

        // [0, 255] -> [-1, 1]
        let mut float_mat = Mat::default();
        rgb.convert_to(&mut float_mat, CV_32FC3, 1.0 / 127.5, -1.0)?;

        let mut tensor = Array4::<f32>::zeros((1, self.height as usize, self.width as usize, 3));
        for y in 0..self.height {
            for x in 0..self.width {
                let pixel = float_mat.at_2d::<Vec3f>(y, x)?;
                for c in 0..3 {
                    tensor[[0, y as usize, x as usize, c]] = pixel[c];
                }
            }
        }

        Ok(tensor)
    }
}

impl Preprocessor<Mat> for ImagePreprocessor {
    fn run(&mut self, frame: &Mat) -> Result<Array4<f32>> {
        self.preprocess(frame)
    }
}
