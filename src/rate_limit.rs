use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::AppState;
use crate::error::AppError;

/// 判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// `retry_after` 後にウィンドウがリセットされる
    Rejected { retry_after: Duration },
}

struct RateWindow {
    started: Instant,
    count: u32,
}

/// クライアントアドレスごとの固定ウィンドウ方式のレート制限。
///
/// ウィンドウ内で `quota` 件まで許可し、それを超えたリクエストは拒否する。
/// 拒否したリクエストはカウントしない。ウィンドウはキーごとに初回アクセス時に作られる。
pub struct RateLimiter {
    windows: DashMap<IpAddr, RateWindow>,
    quota: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            quota,
            window,
        }
    }

    pub fn admit(&self, client: IpAddr) -> bool {
        matches!(self.check(client), Admission::Admitted)
    }

    pub fn check(&self, client: IpAddr) -> Admission {
        let now = Instant::now();
        // entryのガードを保持している間は同一キーの判定が直列化される
        let mut entry = self.windows.entry(client).or_insert(RateWindow {
            started: now,
            count: 0,
        });

        let elapsed = now.duration_since(entry.started);
        if elapsed >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.quota {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.started));
            return Admission::Rejected { retry_after };
        }
        entry.count += 1;
        Admission::Admitted
    }

    /// `"200 per 10 minute"` 形式の説明。
    pub fn describe(&self) -> String {
        let secs = self.window.as_secs();
        if secs >= 60 && secs % 60 == 0 {
            format!("{} per {} minute", self.quota, secs / 60)
        } else {
            format!("{} per {} second", self.quota, secs)
        }
    }
}

/// プロフィール取得・画像プロキシのルートに適用するミドルウェア。
pub async fn enforce(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match state.limiter.check(addr.ip()) {
        Admission::Admitted => Ok(next.run(request).await),
        Admission::Rejected { retry_after } => {
            tracing::info!("rate limit exceeded for {}", addr.ip());
            Err(AppError::TooManyRequests {
                message: format!("Rate limit exceeded: {}", state.limiter.describe()),
                retry_after,
            })
        }
    }
}
