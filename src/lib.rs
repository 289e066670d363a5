pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod notify;
pub mod rate_limit;
pub mod routes;
pub mod types;
pub mod upstream;

use std::sync::Arc;

use config::AppConfig;
use fetch::Fetcher;
use notify::Notifier;
use rate_limit::RateLimiter;
use upstream::HttpUpstream;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub fetcher: Arc<Fetcher<HttpUpstream>>,
    pub limiter: Arc<RateLimiter>,
    pub notifier: Notifier,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("invalid upstream profile URL {url}: {reason}")]
    ProfileUrl { url: String, reason: String },
}

impl AppState {
    /// 設定から共有状態を組み立てる。キャッシュは呼び出し側が所有し、掃除タスクと共有する。
    pub fn new(
        config: AppConfig,
        cache: Arc<cache::TtlCache>,
        notifier: Notifier,
    ) -> Result<Self, StartupError> {
        let profile_url = reqwest::Url::parse(&config.upstream_profile_url).map_err(|e| {
            StartupError::ProfileUrl {
                url: config.upstream_profile_url.clone(),
                reason: e.to_string(),
            }
        })?;
        let mut upstream = HttpUpstream::new(config.upstream_timeout, config.max_body_bytes)?;
        if config.proxy_allow_private {
            tracing::warn!("image proxy may connect to private addresses");
            upstream = upstream.allow_private();
        }
        let fetcher = Fetcher::new(
            upstream,
            cache,
            identity::IdentityRotator::default(),
            notifier.clone(),
            fetch::FetchSettings {
                profile_url,
                cache_ttl: config.cache_ttl,
            },
        );
        let limiter = RateLimiter::new(config.rate_quota, config.rate_window);

        Ok(Self {
            config,
            fetcher: Arc::new(fetcher),
            limiter: Arc::new(limiter),
            notifier,
        })
    }
}

/// 設定に応じたシンクで通知ワーカーを起動する。
/// Bot tokenとchat idの両方が揃っていない場合はログ出力のみ。
pub fn spawn_notifier(config: &AppConfig) -> Notifier {
    match (&config.notify_bot_token, &config.notify_chat_id) {
        (Some(token), Some(chat_id)) => Notifier::spawn(
            notify::TelegramSink::new(&config.notify_api_base, token, chat_id),
            config.notify_queue_capacity,
            config.alert_history,
        ),
        _ => {
            tracing::info!("alert sink not configured, alerts will only be logged");
            Notifier::spawn(
                notify::LogSink,
                config.notify_queue_capacity,
                config.alert_history,
            )
        }
    }
}
