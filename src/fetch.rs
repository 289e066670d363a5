use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::{Map, Value};

use crate::cache::{ProfileStore, TtlCache};
use crate::identity::IdentityRotator;
use crate::notify::Notifier;
use crate::types::{ProfileRecord, normalize_identifier};
use crate::upstream::{Upstream, UpstreamError, UpstreamResponse};

const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/jpeg";
const PROXY_ALERT_SUBJECT: &str = "proxy-image";

/// 解決・取得の最終結果としての失敗。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("not found")]
    NotFound,
    #[error("all {attempts} attempts failed")]
    UpstreamExhausted { attempts: u32 },
    /// 接続先（リダイレクト先を含む）が許可されていない
    #[error("blocked: {0}")]
    Blocked(String),
}

/// 1回の試行の失敗。いずれもリトライ対象。
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] UpstreamError),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed body: {0}")]
    Malformed(String),
}

/// 画像プロキシの取得結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// `?username=` を付与して問い合わせるプロフィールAPIのURL
    pub profile_url: reqwest::Url,
    pub cache_ttl: Duration,
}

/// プロフィールレスポンスの分類結果。
enum ProfileOutcome {
    Found(ProfileRecord),
    Missing,
    Failed(AttemptError),
}

/// キャッシュ参照・リトライ付き上流取得・通知をまとめるフェッチャ。
pub struct Fetcher<U, S = TtlCache> {
    upstream: U,
    store: Arc<S>,
    rotator: IdentityRotator,
    notifier: Notifier,
    settings: FetchSettings,
}

impl<U: Upstream, S: ProfileStore> Fetcher<U, S> {
    pub fn new(
        upstream: U,
        store: Arc<S>,
        rotator: IdentityRotator,
        notifier: Notifier,
        settings: FetchSettings,
    ) -> Self {
        Self {
            upstream,
            store,
            rotator,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 識別子をプロフィールに解決する。
    ///
    /// キャッシュヒット時は上流に問い合わせない。ミス時は最大 `max_attempts` 回試行し、
    /// 404またはユーザ不在のレスポンスでは残りの試行を行わずに `NotFound` を返す。
    /// キャッシュへの書き込みは成功時のみ。
    pub async fn resolve(
        &self,
        identifier: &str,
        max_attempts: u32,
    ) -> Result<ProfileRecord, FetchError> {
        let username = normalize_identifier(identifier);
        if let Some(cached) = self.store.get(&username).await {
            tracing::debug!("cache hit for {username}");
            return Ok(cached);
        }

        let url = self.profile_url(&username);
        for attempt in 1..=max_attempts {
            let identity = self.rotator.next();
            let outcome = match self.upstream.get(&url, identity).await {
                Ok(resp) => classify_profile(&resp, &username),
                Err(e) => ProfileOutcome::Failed(e.into()),
            };

            match outcome {
                ProfileOutcome::Found(record) => {
                    self.store
                        .put(&username, record.clone(), self.settings.cache_ttl)
                        .await;
                    return Ok(record);
                }
                ProfileOutcome::Missing => {
                    self.notifier.notify(format!("⚠️ User not found: {username}"));
                    return Err(FetchError::NotFound);
                }
                ProfileOutcome::Failed(AttemptError::Malformed(reason)) => {
                    tracing::debug!(
                        attempt,
                        "malformed profile response for {username}: {reason}"
                    );
                }
                ProfileOutcome::Failed(e) => {
                    self.report_attempt(&username, attempt, &e, "Request Failed");
                }
            }
        }

        self.notifier
            .notify(format!("🚨 All attempts failed for {username}"));
        Err(FetchError::UpstreamExhausted {
            attempts: max_attempts,
        })
    }

    /// 任意URLの画像を取得する。キャッシュは使わない。
    ///
    /// 接続先が拒否された場合はリトライせず `Blocked` を返す。
    pub async fn fetch_image(
        &self,
        url: &str,
        max_attempts: u32,
    ) -> Result<ImagePayload, FetchError> {
        for attempt in 1..=max_attempts {
            let identity = self.rotator.next();
            let resp = match self.upstream.get_external(url, identity).await {
                Ok(resp) => resp,
                Err(UpstreamError::Blocked(reason)) => {
                    tracing::warn!("image fetch blocked for {url}: {reason}");
                    return Err(FetchError::Blocked(reason));
                }
                Err(e) => {
                    let error = AttemptError::from(e);
                    self.report_attempt(PROXY_ALERT_SUBJECT, attempt, &error, "Image fetch failed");
                    continue;
                }
            };

            match resp.status {
                StatusCode::OK => {
                    return Ok(ImagePayload {
                        content_type: resp
                            .content_type
                            .unwrap_or_else(|| DEFAULT_IMAGE_CONTENT_TYPE.to_string()),
                        bytes: resp.body,
                    });
                }
                StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
                status => self.report_attempt(
                    PROXY_ALERT_SUBJECT,
                    attempt,
                    &AttemptError::Status(status),
                    "Image fetch failed",
                ),
            }
        }

        Err(FetchError::UpstreamExhausted {
            attempts: max_attempts,
        })
    }

    fn profile_url(&self, username: &str) -> String {
        let mut url = self.settings.profile_url.clone();
        url.query_pairs_mut().append_pair("username", username);
        url.to_string()
    }

    /// リトライ対象の失敗をログに残し、通知する。
    fn report_attempt(&self, subject: &str, attempt: u32, error: &AttemptError, what: &str) {
        let message = format_attempt_failure(subject, attempt, error, what);
        tracing::warn!("{message}");
        self.notifier.notify(message);
    }
}

fn format_attempt_failure(subject: &str, attempt: u32, error: &AttemptError, what: &str) -> String {
    let base = format!("❌ ERROR | User: {subject}\n🔁 Attempt: {attempt}");
    match error {
        AttemptError::Status(status) => {
            format!("{base}\n📡 Status: {} ({what})", status.as_u16())
        }
        other => format!("{base}\n⚠️ Exception: {other}"),
    }
}

/// プロフィールAPIのレスポンスを分類する。
fn classify_profile(resp: &UpstreamResponse, username: &str) -> ProfileOutcome {
    match resp.status {
        StatusCode::OK => {}
        StatusCode::NOT_FOUND => return ProfileOutcome::Missing,
        status => return ProfileOutcome::Failed(AttemptError::Status(status)),
    }

    let body: Value = match serde_json::from_slice(&resp.body) {
        Ok(body @ Value::Object(_)) => body,
        Ok(_) => {
            return ProfileOutcome::Failed(AttemptError::Malformed(
                "body is not a JSON object".into(),
            ));
        }
        Err(e) => return ProfileOutcome::Failed(AttemptError::Malformed(e.to_string())),
    };

    match body.pointer("/data/user") {
        Some(Value::Object(user)) if !user.is_empty() => {
            ProfileOutcome::Found(extract_profile(user, username))
        }
        _ => ProfileOutcome::Missing,
    }
}

/// 固定のフィールドのみ抽出する。欠落・型不一致のフィールドは `None`。
fn extract_profile(user: &Map<String, Value>, username: &str) -> ProfileRecord {
    let text = |key: &str| user.get(key).and_then(Value::as_str).map(str::to_string);
    let count = |edge: &str| {
        user.get(edge)
            .and_then(|v| v.get("count"))
            .and_then(Value::as_u64)
    };

    ProfileRecord {
        identifier: text("username").unwrap_or_else(|| username.to_string()),
        display_name: text("full_name"),
        avatar_url: text("profile_pic_url_hd"),
        follower_count: count("edge_followed_by"),
        following_count: count("edge_follow"),
        post_count: count("edge_owner_to_timeline_media"),
        bio: text("biography"),
    }
}
