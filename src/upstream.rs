use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::{StatusCode, Url};

use crate::types::IdentityProfile;

/// クライアント識別ヘッダ名
pub const CLIENT_MARKER_HEADER: &str = "x-ig-app-id";

/// 追跡するリダイレクトの最大ホップ数
const MAX_REDIRECTS: usize = 3;

/// 上流の1回分のレスポンス。
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// 1回のHTTP交換の失敗（接続・タイムアウト・本文読み取り）。
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Transport(String),
    #[error("response exceeds {0} bytes")]
    TooLarge(usize),
    /// 接続先アドレスが許可されていない
    #[error("{0}")]
    Blocked(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Transport(e.to_string())
    }
}

/// 上流へのGETを1回行う。リトライは呼び出し側が担う。
pub trait Upstream: Send + Sync + 'static {
    /// 設定済みの上流APIへのGET。
    fn get(
        &self,
        url: &str,
        identity: &IdentityProfile,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send;

    /// 呼び出し元が指定した任意URLへのGET。実装はリダイレクト先を含む各ホップの
    /// 接続先アドレスを検証する。
    fn get_external(
        &self,
        url: &str,
        identity: &IdentityProfile,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send {
        self.get(url, identity)
    }
}

/// reqwestによる上流クライアント。タイムアウトは1リクエストごとに適用される。
///
/// リダイレクトは自前で最大 `MAX_REDIRECTS` ホップまで追跡する。
/// `get_external` では各ホップの接続先を `address_filter` で検証する。
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
    address_filter: Option<fn(&IpAddr) -> bool>,
}

impl HttpUpstream {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            timeout,
            max_body_bytes,
            address_filter: Some(is_private_ip),
        })
    }

    /// プライベートアドレスへの接続を許可する（開発用）。
    pub fn allow_private(mut self) -> Self {
        self.address_filter = None;
        self
    }

    #[cfg(test)]
    fn with_address_filter(mut self, filter: fn(&IpAddr) -> bool) -> Self {
        self.address_filter = Some(filter);
        self
    }

    fn map_error(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::from(e)
        }
    }

    /// リダイレクトを追跡しながらGETする。`filter` があれば各ホップの接続先を検証する。
    async fn fetch(
        &self,
        url: &str,
        identity: &IdentityProfile,
        filter: Option<fn(&IpAddr) -> bool>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut current =
            Url::parse(url).map_err(|e| UpstreamError::Transport(format!("invalid URL: {e}")))?;
        for _ in 0..=MAX_REDIRECTS {
            if let Some(filter) = filter {
                validate_url_not_private(&current, filter).await?;
            }
            let resp = self
                .client
                .get(current.clone())
                .header(CLIENT_MARKER_HEADER, &identity.client_marker)
                .header(USER_AGENT, &identity.agent_string)
                .send()
                .await
                .map_err(|e| self.map_error(e))?;

            if resp.status().is_redirection() {
                let location = resp
                    .headers()
                    .get(LOCATION)
                    .ok_or_else(|| UpstreamError::Transport("redirect without location".into()))?
                    .to_str()
                    .map_err(|_| UpstreamError::Transport("invalid redirect location".into()))?;
                current = current.join(location).map_err(|e| {
                    UpstreamError::Transport(format!("invalid redirect URL: {e}"))
                })?;
                continue;
            }

            let status = resp.status();
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = read_response_limited(resp, self.max_body_bytes)
                .await
                .map_err(|e| match e {
                    ReadError::Request(e) => self.map_error(e),
                    ReadError::TooLarge => UpstreamError::TooLarge(self.max_body_bytes),
                })?;

            return Ok(UpstreamResponse {
                status,
                content_type,
                body,
            });
        }

        Err(UpstreamError::Transport("too many redirects".into()))
    }
}

impl Upstream for HttpUpstream {
    async fn get(
        &self,
        url: &str,
        identity: &IdentityProfile,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.fetch(url, identity, None).await
    }

    async fn get_external(
        &self,
        url: &str,
        identity: &IdentityProfile,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.fetch(url, identity, self.address_filter).await
    }
}

/// IPアドレスがプライベートレンジに該当するか判定する
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            let seg0 = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (Unique Local Address)
                || (seg0 & 0xfe00) == 0xfc00
                // fe80::/10 (Link-local unicast)
                || (seg0 & 0xffc0) == 0xfe80
                || v6.is_multicast()
        }
    }
}

/// URLのホストが `blocked` に該当するアドレスでないことを検証する
async fn validate_url_not_private(
    url: &Url,
    blocked: fn(&IpAddr) -> bool,
) -> Result<(), UpstreamError> {
    let host = url
        .host_str()
        .ok_or_else(|| UpstreamError::Blocked("URL has no host".into()))?;

    // IPアドレスを直接パースできる場合はそのまま判定（IPv6は角括弧付き）
    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        if blocked(&ip) {
            return Err(UpstreamError::Blocked(
                "private IP address not allowed".into(),
            ));
        }
        return Ok(());
    }

    // DNS解決してIPアドレスをチェック
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| UpstreamError::Blocked(format!("DNS resolution failed for {host}: {e}")))?;

    for socket_addr in addrs {
        if blocked(&socket_addr.ip()) {
            return Err(UpstreamError::Blocked(
                "private IP address not allowed".into(),
            ));
        }
    }
    Ok(())
}

enum ReadError {
    Request(reqwest::Error),
    TooLarge,
}

/// 上限を超えた時点で読み取りを打ち切る。
async fn read_response_limited(
    mut resp: reqwest::Response,
    max_response_size: usize,
) -> Result<Bytes, ReadError> {
    if let Some(len) = resp.content_length()
        && len > max_response_size as u64
    {
        return Err(ReadError::TooLarge);
    }

    let mut out = BytesMut::new();
    while let Some(chunk) = resp.chunk().await.map_err(ReadError::Request)? {
        out.extend_from_slice(&chunk);
        if out.len() > max_response_size {
            return Err(ReadError::TooLarge);
        }
    }
    Ok(out.freeze())
}
