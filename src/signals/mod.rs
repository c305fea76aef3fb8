// =============================================================================
// External signal sources — neural level files and the Pine override feed
// =============================================================================

pub mod neural;
pub mod pine;
