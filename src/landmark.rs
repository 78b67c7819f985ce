/// モデルが出力する 16 ランドマークのインデックス（モデルの出力順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BodyPart {
    HeadTop = 0,
    UpperNeck = 1,
    RightShoulder = 2,
    RightElbow = 3,
    RightWrist = 4,
    Thorax = 5,
    LeftShoulder = 6,
    LeftElbow = 7,
    LeftWrist = 8,
    Pelvis = 9,
    RightHip = 10,
    RightKnee = 11,
    RightAnkle = 12,
    LeftHip = 13,
    LeftKnee = 14,
    LeftAnkle = 15,
}

impl BodyPart {
    pub const COUNT: usize = 16;

    pub const ALL: [BodyPart; Self::COUNT] = [
        Self::HeadTop,
        Self::UpperNeck,
        Self::RightShoulder,
        Self::RightElbow,
        Self::RightWrist,
        Self::Thorax,
        Self::LeftShoulder,
        Self::LeftElbow,
        Self::LeftWrist,
        Self::Pelvis,
        Self::RightHip,
        Self::RightKnee,
        Self::RightAnkle,
        Self::LeftHip,
        Self::LeftKnee,
        Self::LeftAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HeadTop => "head_top",
            Self::UpperNeck => "upper_neck",
            Self::RightShoulder => "right_shoulder",
            Self::RightElbow => "right_elbow",
            Self::RightWrist => "right_wrist",
            Self::Thorax => "thorax",
            Self::LeftShoulder => "left_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::LeftWrist => "left_wrist",
            Self::Pelvis => "pelvis",
            Self::RightHip => "right_hip",
            Self::RightKnee => "right_knee",
            Self::RightAnkle => "right_ankle",
            Self::LeftHip => "left_hip",
            Self::LeftKnee => "left_knee",
            Self::LeftAnkle => "left_ankle",
        }
    }
}

/// 推論結果の単一ランドマーク
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値を超えているか
    pub fn exceeds(&self, threshold: f32) -> bool {
        self.confidence > threshold
    }
}

/// 推論コア1回分の出力
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InferenceResults {
    pub body_parts: [Landmark; BodyPart::COUNT],
}

impl InferenceResults {
    pub fn new(body_parts: [Landmark; BodyPart::COUNT]) -> Self {
        Self { body_parts }
    }

    pub fn get(&self, part: BodyPart) -> &Landmark {
        &self.body_parts[part as usize]
    }
}

/// 後処理後の座標の信頼性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Untrustworthy,
    Trustworthy,
}

/// 後処理済みの座標
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub x: f32,
    pub y: f32,
    pub status: Status,
}

impl Coordinate {
    pub fn new(x: f32, y: f32, status: Status) -> Self {
        Self { x, y, status }
    }

    pub fn is_trustworthy(&self) -> bool {
        self.status == Status::Trustworthy
    }
}

/// 全ランドマークの後処理結果。モデルの生出力ではなく、そのフレームでの最良推定値。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedResults {
    pub body_parts: [Coordinate; BodyPart::COUNT],
}

impl ProcessedResults {
    pub fn get(&self, part: BodyPart) -> &Coordinate {
        &self.body_parts[part as usize]
    }

    pub fn trustworthy_count(&self) -> usize {
        self.body_parts.iter().filter(|c| c.is_trustworthy()).count()
    }
}

/// ヒートマップ [H, W, 16] (行優先) から各ランドマークの最大値ピクセルを求める
///
/// 座標は入力サイズで正規化し、信頼度はピーク値そのもの。
/// 全ピクセルが 0 以下のランドマーク、および空のグリッドは (0, 0, 0) のまま。
pub fn decode_heatmap(heatmap: &[f32], width: usize, height: usize) -> InferenceResults {
    if width == 0 || height == 0 {
        return InferenceResults::default();
    }
    let mut peaks = [(0.0f32, 0usize, 0usize); BodyPart::COUNT];
    let step = BodyPart::COUNT;
    let pixels = (width * height).min(heatmap.len() / step);

    for pixel in 0..pixels {
        let row = &heatmap[pixel * step..(pixel + 1) * step];
        for (part, &value) in row.iter().enumerate() {
            if value > peaks[part].0 {
                peaks[part] = (value, pixel % width, pixel / width);
            }
        }
    }

    let mut body_parts = [Landmark::default(); BodyPart::COUNT];
    for (landmark, (confidence, px, py)) in body_parts.iter_mut().zip(peaks) {
        *landmark = Landmark::new(
            px as f32 / width as f32,
            py as f32 / height as f32,
            confidence,
        );
    }
    InferenceResults::new(body_parts)
}
