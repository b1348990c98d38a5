//! Position lifecycle engine
//!
//! The builder constructs an immutable initial position from a signal, a
//! reference bar, and an ATR reading; the evaluator advances it bar by bar
//! through a three-level profit ladder, a hard stop, and a ratcheting
//! trailing stop.

mod evaluator;
mod pnl;
mod position;

pub use evaluator::{Evaluation, PartialCredit, PositionEvaluator};
pub use pnl::{is_suspicious, pnl_pct, SUSPICIOUS_PNL_PCT};
pub use position::{BuildError, LadderConfig, Position, PositionBuilder, TrailingState};
