use std::sync::atomic::{AtomicU64, Ordering};

/// Cheap unique id source: a random 128-bit seed XOR a per-process counter.
pub(crate) struct MessageIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl MessageIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn message_uuid(&self, seq: u64) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }

    /// `msg_` followed by 32 lowercase hex digits.
    #[must_use]
    pub(crate) fn next_message_id(&self) -> String {
        let uuid = self.message_uuid(self.next_seq());
        format!("msg_{}", uuid.simple())
    }
}
