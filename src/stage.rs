//! パイプラインの外部協調者（カメラ・前処理・推論エンジン）
//!
//! Each stage thread owns its collaborator exclusively, so none of these
//! need to be `Sync`; they only have to move onto their thread.

use anyhow::Result;
use ndarray::Array4;

use crate::landmark::InferenceResults;

/// フレーム供給元
pub trait FrameSource: Send + 'static {
    type Frame: Send + 'static;

    /// 次のフレームを取得。エラーはキャプチャ停止として扱われる
    fn next_frame(&mut self) -> Result<Self::Frame>;
}

/// 生フレームをモデル入力テンソルに変換する
pub trait Preprocessor<F>: Send + 'static {
    fn run(&mut self, frame: &F) -> Result<Array4<f32>>;
}

/// 推論エンジン。ワーカーごとに独立したインスタンスを持つ
pub trait InferenceCore: Send + 'static {
    fn run(&mut self, input: &Array4<f32>) -> Result<InferenceResults>;
}

impl<F, P> Preprocessor<F> for P
where
    P: FnMut(&F) -> Result<Array4<f32>> + Send + 'static,
{
    fn run(&mut self, frame: &F) -> Result<Array4<f32>> {
        self(frame)
    }
}

impl<E> InferenceCore for Box<E>
where
    E: InferenceCore + ?Sized,
{
    fn run(&mut self, input: &Array4<f32>) -> Result<InferenceResults> {
        (**self).run(input)
    }
}
