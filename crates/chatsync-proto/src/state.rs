use crate::protocol::SessionSnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, read-mostly copy of the session for socket and HTTP handlers.
///
/// Only the session core writes here; every `publish` bumps `rev`.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> SessionSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.inner.read().await.rev
    }

    /// Replace the snapshot, keeping the revision counter monotonic.
    pub async fn publish(&self, mut snapshot: SessionSnapshot) -> u64 {
        let mut guard = self.inner.write().await;
        snapshot.rev = guard.rev + 1;
        *guard = snapshot;
        guard.rev
    }

    pub async fn set_player_connected(&self, connected: bool) {
        let mut guard = self.inner.write().await;
        if guard.player_connected != connected {
            guard.player_connected = connected;
            guard.rev += 1;
        }
    }
}
