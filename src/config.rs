use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PROFILE_URL: &str = "https://i.instagram.com/api/v1/users/web_profile_info/";
/// 秒数指定の上限（1年）
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    /// プロフィールキャッシュの有効期間
    pub cache_ttl: Duration,
    /// 期限切れキャッシュを掃除する間隔
    pub sweep_interval: Duration,
    /// プロフィール取得と画像プロキシの既定試行回数
    pub max_retries: u32,
    /// 画像プロキシでクライアントが指定できる試行回数の上限
    pub proxy_max_retries: u32,
    /// ウィンドウあたりの許可リクエスト数（クライアントアドレスごと）
    pub rate_quota: u32,
    pub rate_window: Duration,
    /// 上流リクエスト1回あたりのタイムアウト
    pub upstream_timeout: Duration,
    pub upstream_profile_url: String,
    /// 上流レスポンス本文の上限
    pub max_body_bytes: usize,
    /// 画像プロキシでプライベートアドレスへの接続を許可するか（開発用）
    pub proxy_allow_private: bool,
    /// Telegram Bot token（未設定なら通知はログ出力のみ）
    pub notify_bot_token: Option<String>,
    pub notify_chat_id: Option<String>,
    pub notify_api_base: String,
    pub notify_queue_capacity: usize,
    /// 保持する通知履歴の件数
    pub alert_history: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            cache_ttl: Duration::from_secs(240),
            sweep_interval: Duration::from_secs(60),
            max_retries: 2,
            proxy_max_retries: 5,
            rate_quota: 200,
            rate_window: Duration::from_secs(10 * 60),
            upstream_timeout: Duration::from_secs(10),
            upstream_profile_url: DEFAULT_PROFILE_URL.into(),
            max_body_bytes: 10 * 1024 * 1024,
            proxy_allow_private: false,
            notify_bot_token: None,
            notify_chat_id: None,
            notify_api_base: "https://api.telegram.org".into(),
            notify_queue_capacity: 64,
            alert_history: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            cache_ttl: env_secs("CACHE_TTL_SECS", defaults.cache_ttl),
            sweep_interval: env_secs("CACHE_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            proxy_max_retries: env_parse("PROXY_MAX_RETRIES", defaults.proxy_max_retries),
            rate_quota: env_parse("RATE_LIMIT_QUOTA", defaults.rate_quota),
            rate_window: env_secs("RATE_LIMIT_WINDOW_SECS", defaults.rate_window),
            upstream_timeout: env_secs("UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout),
            upstream_profile_url: env::var("UPSTREAM_PROFILE_URL")
                .unwrap_or(defaults.upstream_profile_url),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            proxy_allow_private: env::var("PROXY_ALLOW_PRIVATE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.proxy_allow_private),
            notify_bot_token: env::var("NOTIFY_BOT_TOKEN").ok().filter(|v| !v.is_empty()),
            notify_chat_id: env::var("NOTIFY_CHAT_ID").ok().filter(|v| !v.is_empty()),
            notify_api_base: env::var("NOTIFY_API_BASE").unwrap_or(defaults.notify_api_base),
            notify_queue_capacity: env_parse(
                "NOTIFY_QUEUE_CAPACITY",
                defaults.notify_queue_capacity,
            ),
            alert_history: env_parse("ALERT_HISTORY", defaults.alert_history),
        }
    }
}

/// 環境変数をパースする。未設定・不正値の場合は既定値を使う。
fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => parse_or(name, &raw, default),
        Err(_) => default,
    }
}

/// 秒数の環境変数。0や上限超えは不正値として既定値を使う。
fn env_secs(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(raw) => parse_secs(name, &raw, default),
        Err(_) => default,
    }
}

fn parse_secs(name: &str, raw: &str, default: Duration) -> Duration {
    let secs = parse_or(name, raw, default.as_secs());
    if !(1..=MAX_DURATION_SECS).contains(&secs) {
        tracing::warn!("{name} must be between 1 and {MAX_DURATION_SECS} seconds, using default");
        return default;
    }
    Duration::from_secs(secs)
}

fn parse_or<T: FromStr>(name: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("invalid value for {name}: {raw:?}, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let config = AppConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(240));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.rate_quota, 200);
        assert_eq!(config.rate_window, Duration::from_secs(600));
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.alert_history, 10);
        assert!(config.notify_bot_token.is_none());
    }

    #[test]
    fn parse_or_accepts_valid_values() {
        assert_eq!(parse_or("X", " 42 ", 7u32), 42);
    }

    #[test]
    fn parse_or_falls_back_on_garbage() {
        assert_eq!(parse_or("X", "forty", 7u32), 7);
        assert_eq!(parse_or("X", "-1", 7u32), 7);
    }

    #[test]
    fn parse_secs_accepts_positive_durations() {
        assert_eq!(
            parse_secs("X", "30", Duration::from_secs(60)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn parse_secs_rejects_zero() {
        let default = Duration::from_secs(60);
        assert_eq!(parse_secs("CACHE_SWEEP_INTERVAL_SECS", "0", default), default);
    }

    #[test]
    fn parse_secs_rejects_oversized_values() {
        let default = Duration::from_secs(240);
        assert_eq!(
            parse_secs("CACHE_TTL_SECS", &u64::MAX.to_string(), default),
            default
        );
        assert_eq!(
            parse_secs("CACHE_TTL_SECS", &(MAX_DURATION_SECS + 1).to_string(), default),
            default
        );
        assert_eq!(parse_secs("CACHE_TTL_SECS", "garbage", default), default);
    }
}
