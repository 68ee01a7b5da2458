// ============================================================================
// strongroom - Core Module
// Constants, identifiers, errors, and configuration shared by all components
// ============================================================================

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
