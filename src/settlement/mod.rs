// Commitment settlement: requirement counting, pool resolution, payouts and the batch driver
pub mod engine;
pub mod payout;
pub mod requirement;
pub mod scheduler;

pub use engine::{SettlementConfig, SettlementEngine};
pub use scheduler::{SettlementScheduleConfig, SettlementScheduler};
