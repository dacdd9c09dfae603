//! Safety checks evaluated against the cluster after each iteration.

use std::collections::BTreeMap;

use crate::schedule::ReplicaId;

/// Committed entry payloads per replica, as snapshotted by the environment.
pub type CommittedLogs = BTreeMap<ReplicaId, Vec<String>>;

/// A predicate over the end-of-iteration cluster state; `false` marks the
/// iteration as a buggy execution.
pub type Checker = Box<dyn Fn(&CommittedLogs) -> bool + Send>;

/// Single-leader log replication must keep every pair of committed logs
/// prefix-compatible: two replicas never disagree on an index both hold.
pub fn logs_agree(logs: &CommittedLogs) -> bool {
    let logs: Vec<&Vec<String>> = logs.values().collect();
    for i in 0..logs.len() {
        for j in i + 1..logs.len() {
            let common = logs[i].len().min(logs[j].len());
            if logs[i][..common] != logs[j][..common] {
                return false;
            }
        }
    }
    true
}

/// The checker wired into fuzzers by default.
pub fn default_checker() -> Checker {
    Box::new(logs_agree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(entries: &[&[&str]]) -> CommittedLogs {
        entries
            .iter()
            .enumerate()
            .map(|(i, log)| {
                (
                    i as ReplicaId + 1,
                    log.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_agreement_holds_for_prefixes() {
        assert!(logs_agree(&logs(&[&["1", "2"], &["1"], &["1", "2"]])));
    }

    #[test]
    fn test_agreement_holds_for_empty_logs() {
        assert!(logs_agree(&logs(&[&[], &[], &[]])));
    }

    #[test]
    fn test_divergent_entry_is_flagged() {
        assert!(!logs_agree(&logs(&[&["1", "2"], &["1", "3"], &["1"]])));
    }
}
