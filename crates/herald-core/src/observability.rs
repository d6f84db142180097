use serde::{Deserialize, Serialize};

/// Records per delivery state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub published: usize,
    pub failed_permanent: usize,
}

impl OutboxCounts {
    pub fn total(&self) -> usize {
        self.pending + self.published + self.failed_permanent
    }
}

/// What one relay cycle did.
///
/// `unconfirmed` counts records the broker accepted but the store could not
/// mark; they will be sent again. `duplicates` counts sends for records some
/// other relay had already marked published. `claim_lost` counts failed sends
/// left untouched because another relay claimed the record after our lease ran
/// out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub skipped: usize,
    pub unconfirmed: usize,
    pub duplicates: usize,
    pub claim_lost: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}
