use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Growth stage of a tomato flower.
///
/// Encoded on the wire and in storage as an integer: 0 = bud, 1 = anthesis,
/// 2 = post-anthesis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    Display, EnumString, IntoStaticStr,
)]
#[serde(try_from = "u8", into = "u8")]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    Bud,
    Anthesis,
    PostAnthesis,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Bud, Stage::Anthesis, Stage::PostAnthesis];

    pub fn code(self) -> u8 {
        match self {
            Stage::Bud => 0,
            Stage::Anthesis => 1,
            Stage::PostAnthesis => 2,
        }
    }

    /// Canonical summary key ("0", "1", "2").
    pub fn key(self) -> String {
        self.code().to_string()
    }

    pub fn from_class_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().and_then(|c| Stage::try_from(c).ok())
    }
}

impl TryFrom<u8> for Stage {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Stage::Bud),
            1 => Ok(Stage::Anthesis),
            2 => Ok(Stage::PostAnthesis),
            other => Err(format!("invalid flower stage {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage.code()
    }
}

/// One located, classified flower within an image or video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x_min, y_min, x_max, y_max]` in source pixel coordinates.
    pub bounding_box: [f32; 4],
    pub stage: Stage,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bounding_box: [f32; 4], stage: Stage, confidence: f32) -> Self {
        Self {
            bounding_box,
            stage,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn width(&self) -> f32 {
        self.bounding_box[2] - self.bounding_box[0]
    }

    pub fn height(&self) -> f32 {
        self.bounding_box[3] - self.bounding_box[1]
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let [ax0, ay0, ax1, ay1] = self.bounding_box;
        let [bx0, by0, bx1, by1] = other.bounding_box;
        let iw = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
        let ih = (ay1.min(by1) - ay0.max(by0)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}
