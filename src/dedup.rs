use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    FirstTime,
    Duplicate,
}

/// Seen-call-id guard.  `admit` is a single mutex-guarded insert, so two
/// near-simultaneous deliveries of the same id cannot both pass.
///
/// Known limitation: the set lives for the process lifetime only — a restart
/// forgets every id, and horizontally-scaled deployments need a shared store
/// behind this same seam instead.
pub struct DedupGuard {
    seen: Mutex<HashSet<String>>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn admit(&self, call_id: &str) -> Admission {
        if self.seen.lock().unwrap().insert(call_id.to_string()) {
            Admission::FirstTime
        } else {
            Admission::Duplicate
        }
    }
}
