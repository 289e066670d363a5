use serde::{Deserialize, Serialize};

/// 正規化済みのプロフィール概要。
///
/// JSONのフィールド名は既存クライアントとの互換のため上流の旧名を維持する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(rename = "username")]
    pub identifier: String,
    #[serde(rename = "real_name")]
    pub display_name: Option<String>,
    #[serde(rename = "profile_pic")]
    pub avatar_url: Option<String>,
    #[serde(rename = "followers")]
    pub follower_count: Option<u64>,
    #[serde(rename = "following")]
    pub following_count: Option<u64>,
    pub post_count: Option<u64>,
    pub bio: Option<String>,
}

/// 上流へのリクエストに付与するヘッダの組。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProfile {
    /// `x-ig-app-id` ヘッダ
    pub client_marker: String,
    /// `User-Agent` ヘッダ
    pub agent_string: String,
}

/// 通知履歴の1件。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    #[serde(rename = "time")]
    pub timestamp: f64,
    #[serde(rename = "msg")]
    pub message: String,
}

/// 識別子を正規化する（大文字小文字を区別しない）。
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.to_lowercase()
}

/// 現在時刻をUNIXエポック秒（小数）で返す。
pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
