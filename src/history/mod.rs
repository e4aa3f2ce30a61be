pub mod aggregator;
pub mod period;

pub use period::HistoryPeriod;
