pub mod pricing;
pub mod service;

pub use service::MarketService;
