use super::CorrelationId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Distinguishes generators created in the same process at the same instant.
static GENERATOR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates process-unique correlation ids.
///
/// Ids have the form `<prefix>-<sequence>`. The prefix combines the process
/// id, the creation timestamp and a per-process generator counter, so two
/// generators never hand out the same id; the sequence is a lock-free
/// atomic counter, so concurrent callers of one generator never collide.
///
/// # Example
///
/// ```
/// use wirerpc_common::protocol::CorrelationIdGenerator;
///
/// let ids = CorrelationIdGenerator::new();
/// assert_ne!(ids.next_id(), ids.next_id());
/// ```
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let generator = GENERATOR_COUNTER.fetch_add(1, Ordering::SeqCst);

        Self {
            prefix: format!("{:x}-{:x}-{:x}", std::process::id(), timestamp, generator),
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, sequence)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
