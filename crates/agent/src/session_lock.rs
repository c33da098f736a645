use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use parley_core::domain::conversation::SessionId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<SessionId, Arc<AsyncMutex<()>>>;

/// One async lock per active session so turns of the same session run one at
/// a time, in arrival order. Entries are dropped once nobody holds or awaits them.
#[derive(Clone, Default)]
pub struct SessionLocks {
    table: Arc<Mutex<LockTable>>,
}

pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: SessionId,
    table: Arc<Mutex<LockTable>>,
}

impl SessionLocks {
    pub async fn acquire(&self, session_id: &SessionId) -> SessionGuard {
        let lock = {
            let mut table = lock_table(&self.table);
            table.entry(session_id.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        SessionGuard { guard: Some(guard), session_id: session_id.clone(), table: self.table.clone() }
    }

    /// Sessions with a holder or waiter right now.
    pub fn active(&self) -> usize {
        lock_table(&self.table).len()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = lock_table(&self.table);
        let idle = table.get(&self.session_id).is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            table.remove(&self.session_id);
        }
    }
}

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    match table.lock() {
        Ok(table) => table,
        Err(poisoned) => poisoned.into_inner(),
    }
}
