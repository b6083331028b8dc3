// ROI analytics and exit decisions
pub mod quit;
pub mod roi;

pub use quit::{QuitDecision, QuitDecisionEngine, QuitReason, QuitRules};
pub use roi::{candles_in_window, window_delta, RoiEngine, MAX_WINDOW_HOURS, MIN_WINDOW_HOURS};
