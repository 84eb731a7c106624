//! Stop handles for in-flight runs
//!
//! Every run registers a [`CancellationToken`] and holds the returned
//! [`RunGuard`] for as long as it streams. Dropping the guard unregisters the
//! run, so [`RunRegistry::cancel_all`] only reaches runs that are still live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct RunSet {
    next_id: u64,
    tokens: HashMap<u64, CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<RunSet>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> RunGuard {
        let token = CancellationToken::new();
        let mut id = 0;
        if let Ok(mut set) = self.inner.lock() {
            id = set.next_id;
            set.next_id += 1;
            set.tokens.insert(id, token.clone());
        }
        RunGuard {
            id,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel every live run; returns how many were reached
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = match self.inner.lock() {
            Ok(mut set) => set.tokens.drain().map(|(_, token)| token).collect(),
            Err(_) => Vec::new(),
        };
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    pub fn active(&self) -> usize {
        self.inner.lock().map(|set| set.tokens.len()).unwrap_or(0)
    }
}

/// Registration of one run; unregisters on drop
#[derive(Debug)]
pub struct RunGuard {
    id: u64,
    token: CancellationToken,
    registry: RunRegistry,
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.registry.inner.lock() {
            set.tokens.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_runs_are_unregistered() {
        let registry = RunRegistry::new();
        let first = registry.register();
        let second = registry.register();
        assert_eq!(registry.active(), 2);

        drop(first);
        assert_eq!(registry.active(), 1);
        assert_eq!(registry.cancel_all(), 1);
        assert!(second.is_cancelled());
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_cancel_reaches_every_concurrent_run() {
        let registry = RunRegistry::new();
        let runs: Vec<RunGuard> = (0..3).map(|_| registry.register()).collect();
        assert_eq!(registry.cancel_all(), 3);
        assert!(runs.iter().all(RunGuard::is_cancelled));
    }

    #[test]
    fn test_cancel_with_nothing_running() {
        let registry = RunRegistry::new();
        assert_eq!(registry.cancel_all(), 0);
        let late = registry.register();
        assert!(!late.is_cancelled());
    }
}
