use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::types::{AlertRecord, epoch_now};

/// 通知の送信先。
pub trait AlertSink: Send + Sync + 'static {
    fn deliver(&self, message: &str) -> impl Future<Output = Result<(), SinkError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sink returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Telegram Bot APIの `sendMessage` に送信するシンク。
pub struct TelegramSink {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(api_base: &str, bot_token: &str, chat_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/bot{bot_token}/sendMessage", api_base.trim_end_matches('/')),
            chat_id: chat_id.to_string(),
        }
    }
}

impl AlertSink for TelegramSink {
    async fn deliver(&self, message: &str) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", message)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        Ok(())
    }
}

/// 送信先が設定されていない場合に使う、ログ出力のみのシンク。
pub struct LogSink;

impl AlertSink for LogSink {
    async fn deliver(&self, message: &str) -> Result<(), SinkError> {
        tracing::info!("alert: {message}");
        Ok(())
    }
}

enum Command {
    Alert(AlertRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// ベストエフォートの通知キュー。
///
/// `notify` はキューに積むだけで即座に戻り、送信はワーカータスクが行う。
/// キューが満杯の場合は新しい通知を破棄する（drop-newest）。
/// 送信の成否にかかわらず、試行後に履歴へ追加する。履歴は直近 `history_capacity` 件のみ保持する。
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Command>,
    history: Arc<Mutex<VecDeque<AlertRecord>>>,
}

impl Notifier {
    pub fn spawn<K: AlertSink>(sink: K, queue_capacity: usize, history_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let history = Arc::new(Mutex::new(VecDeque::with_capacity(history_capacity)));
        tokio::spawn(run_worker(sink, rx, history.clone(), history_capacity));
        Self { tx, history }
    }

    /// 通知をキューに積む。失敗しても呼び出し側には伝播しない。
    pub fn notify(&self, message: impl Into<String>) {
        let alert = AlertRecord {
            timestamp: epoch_now(),
            message: message.into(),
        };
        match self.tx.try_send(Command::Alert(alert)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Command::Alert(alert))) => {
                tracing::warn!("alert queue full, dropping alert: {}", alert.message);
            }
            Err(_) => {
                tracing::debug!("alert worker stopped, dropping alert");
            }
        }
    }

    /// 通知履歴（古い順）。
    pub fn recent(&self) -> Vec<AlertRecord> {
        lock_history(&self.history).iter().cloned().collect()
    }

    /// これまでにキューへ積んだ通知がすべて処理されるまで待つ。
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// 残りの通知を処理してからワーカーを停止する。
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_worker<K: AlertSink>(
    sink: K,
    mut rx: mpsc::Receiver<Command>,
    history: Arc<Mutex<VecDeque<AlertRecord>>>,
    history_capacity: usize,
) {
    let mut shutdown_ack = None;
    while let Some(command) = rx.recv().await {
        match command {
            Command::Alert(alert) => {
                if let Err(e) = sink.deliver(&alert.message).await {
                    tracing::error!("failed to send alert notification: {e}");
                }
                let mut recent = lock_history(&history);
                recent.push_back(alert);
                while recent.len() > history_capacity {
                    recent.pop_front();
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                rx.close();
                shutdown_ack = Some(ack);
            }
        }
    }
    tracing::info!("alert worker stopped");
    if let Some(ack) = shutdown_ack {
        let _ = ack.send(());
    }
}

fn lock_history(
    history: &Mutex<VecDeque<AlertRecord>>,
) -> std::sync::MutexGuard<'_, VecDeque<AlertRecord>> {
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
