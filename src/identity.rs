use rand::seq::SliceRandom;

use crate::types::IdentityProfile;

const APP_ID: &str = "936619743392459";

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.6167.86 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 7 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.6261.105 Mobile Safari/537.36",
];

/// リクエストごとにヘッダの組をランダムに選ぶ。
///
/// プールは起動時に固定され、以降は読み取り専用。
#[derive(Debug, Clone)]
pub struct IdentityRotator {
    pool: Vec<IdentityProfile>,
}

impl IdentityRotator {
    /// 空のプールは受け付けない。
    pub fn new(pool: Vec<IdentityProfile>) -> Option<Self> {
        if pool.is_empty() {
            return None;
        }
        Some(Self { pool })
    }

    /// プールから一様ランダムに1つ選ぶ。前回の選択には依存しない。
    pub fn next(&self) -> &IdentityProfile {
        self.pool
            .choose(&mut rand::thread_rng())
            .unwrap_or(&self.pool[0])
    }

    pub fn pool(&self) -> &[IdentityProfile] {
        &self.pool
    }
}

impl Default for IdentityRotator {
    fn default() -> Self {
        let pool = USER_AGENTS
            .iter()
            .map(|ua| IdentityProfile {
                client_marker: APP_ID.to_string(),
                agent_string: ua.to_string(),
            })
            .collect();
        Self { pool }
    }
}
