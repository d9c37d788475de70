use serde::{Deserialize, Serialize};

use crate::time::TimestampSeconds;

// Emitted when a watched address balance is different from the previous poll
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BalanceChanged {
    pub address: String,
    pub previous: u64,
    pub current: u64
}

impl BalanceChanged {
    // Signed difference in lamports, saturated at the i64 bounds
    pub fn delta(&self) -> i64 {
        let delta = i128::from(self.current) - i128::from(self.previous);
        i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
    }
}

// Result of a ledger synchronization for a wallet
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub wallet_id: u64,
    pub address: String,
    pub new_transactions: usize,
    pub balance: u64,
    pub checked_at: TimestampSeconds
}

// Failure observed by a polling loop, the loop keeps running after it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MonitorFailure {
    pub address: String,
    pub operation: String,
    pub message: String
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    // Contains a BalanceChanged as value
    BalanceChanged,
    // Contains a SyncSummary as value
    Synced,
    // Contains a MonitorFailure as value
    MonitorError,
    // Emitted once the polling loop observed its cancellation
    MonitorStopped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(previous: u64, current: u64) -> BalanceChanged {
        BalanceChanged {
            address: "addr".to_string(),
            previous,
            current
        }
    }

    #[test]
    fn test_balance_delta() {
        assert_eq!(change(100, 150).delta(), 50);
        assert_eq!(change(150, 100).delta(), -50);
        assert_eq!(change(u64::MAX, u64::MAX - 1).delta(), -1);
        assert_eq!(change(0, u64::MAX).delta(), i64::MAX);
        assert_eq!(change(u64::MAX, 0).delta(), i64::MIN);
    }
}
