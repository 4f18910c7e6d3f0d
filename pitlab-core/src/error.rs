//! Engine-wide error taxonomy.
//!
//! Each component keeps its own error enum; [`EngineError`] gathers them so a
//! driver can decide, in one place, whether a condition ends the run, was
//! already recovered, or only needs surfacing to the operator.

use crate::allocation::SolverFailure;
use crate::clock::ClockError;
use crate::contracts::ContractError;
use crate::domain::{FillId, OrderId, SecurityId, WeightsError};
use crate::olm::{OlmError, ReconciliationDiscrepancy, SafetyRejection};
use crate::pit::PitError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a driver does with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Abort the run; the condition indicates a defect.
    Fatal,
    /// Already handled by a fallback policy; keep going.
    Recovered,
    /// Nothing to recover, but an operator must see it.
    Surfaced,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Pit(#[from] PitError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("solver failure: {0}")]
    Solver(#[from] SolverFailure),
    #[error(transparent)]
    Weights(#[from] WeightsError),
    #[error("order lifecycle: {0}")]
    Olm(#[from] OlmError),
    #[error("safety rejection on {order_id}: {rejection}")]
    Safety {
        order_id: OrderId,
        rejection: SafetyRejection,
    },
    #[error(
        "reconciliation discrepancy on {}: internal {} broker {}",
        .0.security_id, .0.internal_qty, .0.broker_qty
    )]
    Reconciliation(ReconciliationDiscrepancy),
    #[error("broker timeout on {0}")]
    BrokerTimeout(OrderId),
    #[error("duplicate fill {fill_id} on {order_id}")]
    DuplicateFill { order_id: OrderId, fill_id: FillId },
    #[error("data gap on {0} recovered by forward fill")]
    DataGapFilled(SecurityId),
}

impl EngineError {
    pub fn disposition(&self) -> Disposition {
        match self {
            EngineError::Clock(_) => Disposition::Fatal,
            EngineError::Pit(PitError::Causality(_)) => Disposition::Fatal,
            EngineError::Pit(PitError::DataGap { .. } | PitError::NoRiskModel { .. }) => {
                Disposition::Recovered
            }
            EngineError::Pit(PitError::Store(_)) | EngineError::Contract(_) => {
                Disposition::Surfaced
            }
            EngineError::Solver(_) | EngineError::Weights(_) => Disposition::Recovered,
            EngineError::Olm(_) => Disposition::Surfaced,
            EngineError::Safety { .. } => Disposition::Surfaced,
            EngineError::Reconciliation(_)
            | EngineError::BrokerTimeout(_)
            | EngineError::DuplicateFill { .. }
            | EngineError::DataGapFilled(_) => Disposition::Recovered,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Fatal
    }
}
