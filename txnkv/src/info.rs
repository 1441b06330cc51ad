//! Human-readable observability summary for a running replica, in the
//! teacher's `storage::get_info` line-list style (SPEC_FULL §6
//! `ReplicaStats`, carried for CLI `info`/`--stats_file` parity).

use crate::replica::Replica;

/// Lines describing the active protocol's transaction counts, the
/// shape `txnkv-server`'s CLI prints and `--stats_file` serializes.
pub fn get_info(replica: &Replica) -> Vec<String> {
    let stats = replica.stats();
    vec![
        "txnkv replica:".to_string(),
        format!("address: {}", replica.address()),
        format!("prepared: {}", stats.prepared),
        format!("committed: {}", stats.committed),
        format!("aborted: {}", stats.aborted),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::InProcessTransport;
    use crate::replica::{ProtocolKind, ReplicaConfig};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn reports_zeroed_counts_for_a_fresh_replica() {
        let transport = Arc::new(InProcessTransport::new());
        let replica = Replica::new(
            ReplicaConfig { address: 1, protocol: ProtocolKind::OccLinearizable, clock_skew: Duration::ZERO, clock_error: Duration::ZERO },
            transport,
        );
        let lines = get_info(&replica);
        assert!(lines.iter().any(|l| l == "prepared: 0"));
        assert!(lines.iter().any(|l| l == "address: 1"));
    }
}
