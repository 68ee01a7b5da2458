// ============================================================================
// strongroom - Constants
// Capacity limits for the bank's bitmask lock composition
// ============================================================================

/// Maximum number of vaults (distinct lockable identifiers) per bank.
///
/// Each identifier is assigned a disjoint power-of-two bit so that any
/// subset of identifiers can be composed into a single `u32` lock value.
/// The ceiling is intrinsic to that representation: one machine integer,
/// 32 bits, 32 vaults. Exceeding it is a fatal configuration error.
pub const MAX_VAULTS: usize = 32;

/// Prior-registration count at which the bank emits an early capacity
/// warning. Suppressible through the coordinator configuration.
pub const VAULTS_SOFT_WARNING: usize = 24;

/// Prior-registration count at which the bank warns that only one vault
/// remains. Always emitted.
pub const VAULTS_FINAL_WARNING: usize = 31;

// =============================================================================
// TESTS
// =============================================================================
