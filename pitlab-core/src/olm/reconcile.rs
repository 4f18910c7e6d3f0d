use crate::domain::{SecurityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A ledger quantity that disagreed with the broker. Always surfaced; the
/// broker's value is what the ledger holds afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationDiscrepancy {
    pub security_id: SecurityId,
    pub internal_qty: i64,
    pub broker_qty: i64,
    pub detected_at: Timestamp,
}

/// Every security where `internal` and `broker` quantities differ.
/// Absent entries count as zero.
pub fn diff_positions(
    internal: &BTreeMap<SecurityId, i64>,
    broker: &BTreeMap<SecurityId, i64>,
    at: Timestamp,
) -> Vec<ReconciliationDiscrepancy> {
    let ids: BTreeSet<SecurityId> = internal.keys().chain(broker.keys()).copied().collect();
    ids.into_iter()
        .filter_map(|id| {
            let internal_qty = internal.get(&id).copied().unwrap_or(0);
            let broker_qty = broker.get(&id).copied().unwrap_or(0);
            (internal_qty != broker_qty).then_some(ReconciliationDiscrepancy {
                security_id: id,
                internal_qty,
                broker_qty,
                detected_at: at,
            })
        })
        .collect()
}
