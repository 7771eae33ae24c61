use serde::{Deserialize, Serialize};

use crate::extract::MatchTier;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractImageRequest {
    pub response_text: String,
    #[serde(default)]
    pub query_params: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractAudioRequest {
    pub response_text: String,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub image_url: String,
    pub tier: MatchTier,
}

#[derive(Debug, Serialize)]
pub struct AudioResponse {
    pub audio_url: String,
    pub audio_text: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub image_url: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub file_path: String,
}
