//! CompreFace wire types.
//!
//! Only the fields Facelab reads are declared; serde ignores the rest
//! (landmarks, pose, execution times, plugin versions, ...).

use facelab_core::types::{AgeRange, DetectedFace, Embedding, FaceBox, Gender};
use serde::Deserialize;

/// CompreFace error code for "No face is found in the given image".
pub const NO_FACE_FOUND_CODE: i64 = 28;

#[derive(Debug, Clone, Deserialize)]
pub struct BoxInfo {
    #[serde(default)]
    pub probability: f64,
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgeInfo {
    #[serde(default)]
    pub probability: f64,
    pub low: u32,
    pub high: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenderInfo {
    #[serde(default)]
    pub probability: f64,
    pub value: String,
}

/// `POST /api/v1/recognition/recognize` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub result: Vec<RecognizedFace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizedFace {
    #[serde(rename = "box")]
    pub face_box: Option<BoxInfo>,
    /// Present only when the `calculator` plugin is enabled.
    pub embedding: Option<Vec<f64>>,
    pub age: Option<AgeInfo>,
    pub gender: Option<GenderInfo>,
}

/// `POST /api/v1/verification/verify` response.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationResponse {
    #[serde(default)]
    pub result: Vec<VerificationItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationItem {
    #[serde(default)]
    pub face_matches: Vec<FaceMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceMatch {
    pub similarity: f64,
    pub age: Option<AgeInfo>,
    pub gender: Option<GenderInfo>,
}

/// Error body CompreFace sends with 4xx/5xx answers.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    pub code: Option<i64>,
}

impl From<BoxInfo> for FaceBox {
    fn from(b: BoxInfo) -> Self {
        FaceBox {
            probability: b.probability,
            x_min: b.x_min,
            y_min: b.y_min,
            x_max: b.x_max,
            y_max: b.y_max,
        }
    }
}

impl From<AgeInfo> for AgeRange {
    fn from(a: AgeInfo) -> Self {
        AgeRange {
            probability: a.probability,
            low: a.low,
            high: a.high,
        }
    }
}

impl From<GenderInfo> for Gender {
    fn from(g: GenderInfo) -> Self {
        Gender {
            probability: g.probability,
            value: g.value,
        }
    }
}

impl RecognizedFace {
    /// Convert to a [`DetectedFace`]; `None` when no embedding was returned.
    pub fn into_detected(self) -> Option<DetectedFace> {
        let embedding = self.embedding?;
        Some(DetectedFace {
            embedding: Embedding::new(embedding),
            face_box: self.face_box.map(Into::into),
            age: self.age.map(Into::into),
            gender: self.gender.map(Into::into),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECOGNIZE_BODY: &str = r#"{
        "result": [{
            "age": {"probability": 0.93, "high": 32, "low": 25},
            "gender": {"probability": 0.99, "value": "female"},
            "pose": {"pitch": -1.5, "roll": 2.1, "yaw": 0.3},
            "embedding": [0.01, -0.02, 0.03],
            "box": {"probability": 1.0, "x_max": 310, "y_max": 280, "x_min": 120, "y_min": 60},
            "landmarks": [[150, 140], [250, 140]],
            "subjects": [],
            "execution_time": {"age": 12.0, "detector": 80.0}
        }],
        "plugins_versions": {"calculator": "facenet.Calculator"}
    }"#;

    #[test]
    fn test_parse_recognition_response() {
        let parsed: RecognitionResponse = serde_json::from_str(RECOGNIZE_BODY).unwrap();
        assert_eq!(parsed.result.len(), 1);

        let face = parsed.result.into_iter().next().unwrap().into_detected().unwrap();
        assert_eq!(face.embedding.values, vec![0.01, -0.02, 0.03]);
        assert_eq!(face.face_box.unwrap().x_max, 310);
        assert_eq!(face.age.unwrap().low, 25);
        assert_eq!(face.gender.unwrap().value, "female");
    }

    #[test]
    fn test_face_without_embedding() {
        let parsed: RecognitionResponse =
            serde_json::from_str(r#"{"result":[{"box":{"probability":1,"x_max":1,"y_max":1,"x_min":0,"y_min":0}}]}"#)
                .unwrap();
        assert!(parsed.result.into_iter().next().unwrap().into_detected().is_none());
    }

    #[test]
    fn test_parse_verification_response() {
        let body = r#"{"result":[{"source_image_face":{"box":{"probability":1,"x_max":1,"y_max":1,"x_min":0,"y_min":0}},
            "face_matches":[{"box":{"probability":1,"x_max":1,"y_max":1,"x_min":0,"y_min":0},"similarity":0.97,
            "age":{"probability":0.8,"high":40,"low":30},"gender":{"probability":0.9,"value":"male"}}]}]}"#;
        let parsed: VerificationResponse = serde_json::from_str(body).unwrap();
        let m = &parsed.result[0].face_matches[0];
        assert_eq!(m.similarity, 0.97);
        assert_eq!(m.age.as_ref().unwrap().high, 40);
    }

    #[test]
    fn test_parse_error_body() {
        let parsed: ErrorBody =
            serde_json::from_str(r#"{"message":"No face is found in the given image","code":28}"#).unwrap();
        assert_eq!(parsed.code, Some(NO_FACE_FOUND_CODE));
    }
}
