use std::collections::BTreeMap;

/// Counters owned by one shard. Plugins add their own by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardMetrics {
    pub ticks: u64,
    pub inputs_applied: u64,
    pub decode_errors: u64,
    pub unexpected_messages: u64,
    pub commands_dispatched: u64,
    pub commands_unhandled: u64,
    pub command_failures: u64,
    pub system_failures: u64,
    pub snapshots_sent: u64,
    pub snapshots_dropped: u64,
    pub snapshot_bytes: u64,
    pub snapshot_entities_trimmed: u64,
    pub migrations_requested: u64,
    /// Requests re-sent after the previous one went unanswered.
    pub migration_retries: u64,
    pub outbox_sent: u64,
    /// Outbox messages whose client was gone or whose ring was full.
    pub outbox_dropped: u64,
    pub clients_attached: u64,
    pub clients_detached: u64,
    custom: BTreeMap<String, u64>,
}

impl ShardMetrics {
    pub fn counter(&mut self, name: &str) -> &mut u64 {
        self.custom.entry(name.to_owned()).or_default()
    }

    pub fn custom(&self) -> &BTreeMap<String, u64> {
        &self.custom
    }
}
