//! Leadership oracle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Answers whether this unit is the elected leader. Polled on every trigger.
pub trait LeadershipOracle {
    fn is_leader(&self) -> bool;
}

impl<T: LeadershipOracle + ?Sized> LeadershipOracle for Arc<T> {
    fn is_leader(&self) -> bool {
        (**self).is_leader()
    }
}

/// Leadership supplied by the hosting runtime (a flag or environment value).
///
/// Clones share the same flag, so the runtime can flip it between events.
#[derive(Debug, Clone, Default)]
pub struct StaticLeadership {
    leader: Arc<AtomicBool>,
}

impl StaticLeadership {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: Arc::new(AtomicBool::new(leader)),
        }
    }

    pub fn set(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl LeadershipOracle for StaticLeadership {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

/// Leadership read from a lease file naming the current leader unit.
///
/// The file is re-read on every poll, so whatever runs the election can
/// hand leadership over while the daemon keeps running. A missing or
/// empty file means no unit leads.
#[derive(Debug, Clone)]
pub struct LeaseFileLeadership {
    path: PathBuf,
    unit: String,
}

impl LeaseFileLeadership {
    pub fn new(path: impl Into<PathBuf>, unit: &str) -> Self {
        Self {
            path: path.into(),
            unit: unit.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The unit currently named in the lease file.
    pub fn holder(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let holder = content.trim();
                (!holder.is_empty()).then(|| holder.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read leader lease");
                None
            }
        }
    }
}

impl LeadershipOracle for LeaseFileLeadership {
    fn is_leader(&self) -> bool {
        self.holder().as_deref() == Some(self.unit.as_str())
    }
}
