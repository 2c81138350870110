//! Distributed leader election via a short-lived named lock in the KV store.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

const LOCK_KEY: &str = "locks:continuous_sweep_leader";

/// Holds (or attempts to hold) the leader lease for the continuous-sweep
/// controller. Only the holder emits sweep jobs (§4.2 "Leader election").
pub struct LeaderLease {
    conn: ConnectionManager,
    token: String,
    lease: Duration,
    is_leader: bool,
}

impl LeaderLease {
    pub fn new(conn: ConnectionManager, lease: Duration) -> Self {
        Self {
            conn,
            token: uuid_like_token(),
            lease,
            is_leader: false,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Attempts to acquire the lease with `SET key token NX PX lease_ms`.
    pub async fn try_acquire(&mut self) -> bool {
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(LOCK_KEY)
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg(self.lease.as_millis() as i64)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map(|v| v.is_some())
            .unwrap_or(false);
        if acquired {
            info!(token = %self.token, "acquired continuous-sweep leader lease");
        }
        self.is_leader = acquired;
        acquired
    }

    /// Renews the lease if still held. Best-effort: if the holder field
    /// doesn't match our token (another leader took over), demotes to
    /// passive rather than clobbering the new holder.
    pub async fn renew(&mut self) {
        let mut conn = self.conn.clone();
        let current: Option<String> = conn.get(LOCK_KEY).await.ok().flatten();
        if current.as_deref() != Some(self.token.as_str()) {
            if self.is_leader {
                warn!("lost continuous-sweep leader lease");
            }
            self.is_leader = false;
            return;
        }
        let _: Result<(), _> = conn.pexpire(LOCK_KEY, self.lease.as_millis() as i64).await;
    }

    /// Releases the lease if still held, used on graceful shutdown.
    pub async fn release(&mut self) {
        if !self.is_leader {
            return;
        }
        let mut conn = self.conn.clone();
        let current: Option<String> = conn.get(LOCK_KEY).await.ok().flatten();
        if current.as_deref() == Some(self.token.as_str()) {
            let _: Result<(), _> = conn.del(LOCK_KEY).await;
        }
        self.is_leader = false;
    }
}

fn uuid_like_token() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
