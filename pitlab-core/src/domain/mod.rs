//! Domain types shared by every component.

pub mod bar;
pub mod corporate_action;
pub mod fill;
pub mod ids;
pub mod instant;
pub mod order;
pub mod position;
pub mod report;
pub mod weights;

pub use bar::{Adjustment, Bar, BarOrigin, Interval};
pub use corporate_action::{ActionType, CorporateAction, UniverseMembership};
pub use fill::Fill;
pub use ids::{FillId, OrderId, OrderIdGen, RunId, SecurityId};
pub use instant::{DateRange, Instant, Stamped, TimeRange, Timestamp};
pub use order::{Order, OrderAuditEntry, OrderSide, OrderState, RejectReason, SafetyCheck};
pub use position::Position;
pub use report::ExecutionReport;
pub use weights::{ForecastSet, TargetWeights, WeightDelta, WeightsError};
