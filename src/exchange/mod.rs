// =============================================================================
// Exchange layer — low-level REST clients and order-validation filters
// =============================================================================

pub mod binance;
pub mod error;
pub mod filters;
