use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::types::{ProfileRecord, normalize_identifier};

/// TTLの上限。これより長い指定は切り詰める。
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// 掃除間隔の下限
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// プロフィールのキャッシュストア。
///
/// 呼び出し側はこのトレイト越しにのみアクセスするため、
/// 実装を外部ストア等に差し替えても呼び出し箇所は変わらない。
pub trait ProfileStore: Send + Sync + 'static {
    /// 有効期限内のエントリのみ返す。掃除前の期限切れエントリも不在として扱う。
    fn get(&self, key: &str) -> impl Future<Output = Option<ProfileRecord>> + Send;

    /// エントリを挿入または上書きする。有効期限は `now + ttl`。
    /// 実装は `ttl` を有限の上限に切り詰めてよい。
    fn put(&self, key: &str, value: ProfileRecord, ttl: Duration)
    -> impl Future<Output = ()> + Send;

    /// 期限切れのエントリを削除し、削除件数を返す。
    fn sweep(&self) -> impl Future<Output = usize> + Send;

    /// 物理的に保持しているエントリ数（未掃除の期限切れを含む）。
    fn len(&self) -> impl Future<Output = usize> + Send;
}

/// キャッシュエントリ: プロフィールと有効期限。
struct CacheEntry {
    value: ProfileRecord,
    expires_at: Instant,
}

/// インメモリのTTLキャッシュ。キーは小文字に正規化される。
#[derive(Clone, Default)]
pub struct TtlCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for TtlCache {
    async fn get(&self, key: &str) -> Option<ProfileRecord> {
        let key = normalize_identifier(key);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            _ => None,
        }
    }

    async fn put(&self, key: &str, value: ProfileRecord, ttl: Duration) {
        let key = normalize_identifier(key);
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl.min(MAX_TTL),
        };
        self.entries.write().await.insert(key, entry);
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// 期限切れエントリを定期的に掃除するバックグラウンドタスク。
///
/// 起動直後に1回掃除し、以降 `interval` ごとに繰り返す。
/// `interval` は `MIN_SWEEP_INTERVAL` 未満にならない。
/// `stop` で明示的に停止する。停止せずにdropした場合はタスクをabortする。
pub struct Sweeper {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn<S: ProfileStore>(store: Arc<S>, interval: Duration) -> Self {
        if interval < MIN_SWEEP_INTERVAL {
            tracing::warn!(?interval, "sweep interval too short, using {MIN_SWEEP_INTERVAL:?}");
        }
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep().await;
                        if removed > 0 {
                            tracing::info!(removed, "cache sweep finished");
                        } else {
                            tracing::debug!("cache sweep finished, nothing expired");
                        }
                    }
                }
            }
            tracing::info!("cache sweeper stopped");
        });
        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// タスクに停止を通知し、終了を待つ。
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "cache sweeper terminated abnormally");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(240);

    fn record(name: &str) -> ProfileRecord {
        ProfileRecord {
            identifier: name.to_string(),
            display_name: Some(format!("{name} display")),
            avatar_url: None,
            follower_count: Some(1),
            following_count: Some(2),
            post_count: Some(3),
            bio: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn get_returns_value_within_ttl() {
        let cache = TtlCache::new();
        cache.put("x", record("x"), TTL).await;

        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(cache.get("x").await, Some(record("x")));
    }

    #[tokio::test(start_paused = true)]
    async fn get_rejects_expired_entry_before_sweep() {
        let cache = TtlCache::new();
        cache.put("x", record("x"), TTL).await;

        tokio::time::advance(Duration::from_secs(241)).await;
        assert_eq!(cache.get("x").await, None);
        // まだ物理的には残っている
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_stale_exactly_at_expiry() {
        let cache = TtlCache::new();
        cache.put("x", record("x"), TTL).await;

        tokio::time::advance(TTL).await;
        assert_eq!(cache.get("x").await, None);
    }

    #[tokio::test]
    async fn keys_are_case_insensitive() {
        let cache = TtlCache::new();
        cache.put("NatGeo", record("natgeo"), TTL).await;
        assert_eq!(cache.get("natgeo").await, Some(record("natgeo")));
        assert_eq!(cache.get("NATGEO").await, Some(record("natgeo")));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_value_and_expiry() {
        let cache = TtlCache::new();
        cache.put("x", record("old"), TTL).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.put("x", record("new"), TTL).await;

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(cache.get("x").await, Some(record("new")));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let cache = TtlCache::new();
        cache.put("old", record("old"), TTL).await;
        tokio::time::advance(Duration::from_secs(100)).await;
        cache.put("fresh", record("fresh"), TTL).await;

        tokio::time::advance(Duration::from_secs(141)).await;
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("fresh").await, Some(record("fresh")));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_entry_until_expiry() {
        let cache = TtlCache::new();
        cache.put("x", record("x"), TTL).await;

        tokio::time::advance(Duration::from_secs(239)).await;
        assert_eq!(cache.sweep().await, 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_clears_expired_entries_and_stops() {
        let cache = Arc::new(TtlCache::new());
        cache.put("x", record("x"), TTL).await;

        let sweeper = Sweeper::spawn(cache.clone(), Duration::from_secs(60));
        // 期限(240秒)ちょうどのティックで削除される
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(cache.len().await, 0);

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttl_is_capped_instead_of_overflowing() {
        let cache = TtlCache::new();
        cache.put("x", record("x"), Duration::MAX).await;

        tokio::time::advance(Duration::from_secs(30 * 24 * 60 * 60)).await;
        assert_eq!(cache.get("x").await, Some(record("x")));
        assert_eq!(cache.sweep().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_sweeper_keeps_running() {
        let cache = Arc::new(TtlCache::new());
        cache.put("x", record("x"), Duration::from_secs(5)).await;

        let sweeper = Sweeper::spawn(cache.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.len().await, 0);

        cache.put("y", record("y"), Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.len().await, 0);

        sweeper.stop().await;
    }
}
