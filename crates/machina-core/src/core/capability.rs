// crates/machina-core/src/core/capability.rs
// ============================================================================
// Module: Machina Capability Masks
// Description: Bitmask over the capabilities a plugin may declare.
// Purpose: Let the host bound what dynamically loaded tools are allowed to do.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Plugins declare a [`CapabilityMask`] over seven capability bits; the host
//! configures an allowed mask and rejects any plugin whose declaration
//! exceeds it. A plugin that declares nothing defaults to all capabilities
//! for backwards compatibility, unless the host requires declaration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Capability Bits
// ============================================================================

/// One plugin capability.
///
/// # Invariants
/// - Bit values are stable ABI: they appear in plugin exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read files.
    FileRead,
    /// Write files.
    FileWrite,
    /// Spawn shell commands.
    Shell,
    /// Open network connections.
    Network,
    /// Allocate large or shared memory regions.
    Memory,
    /// Generate and register new tools at runtime.
    Genesis,
    /// Use GPU devices.
    Gpu,
}

impl Capability {
    /// All capabilities in bit order.
    pub const ALL: [Self; 7] = [
        Self::FileRead,
        Self::FileWrite,
        Self::Shell,
        Self::Network,
        Self::Memory,
        Self::Genesis,
        Self::Gpu,
    ];

    /// Returns the bit assigned to this capability.
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Self::FileRead => 1,
            Self::FileWrite => 1 << 1,
            Self::Shell => 1 << 2,
            Self::Network => 1 << 3,
            Self::Memory => 1 << 4,
            Self::Genesis => 1 << 5,
            Self::Gpu => 1 << 6,
        }
    }

    /// Returns the stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::Shell => "shell",
            Self::Network => "network",
            Self::Memory => "memory",
            Self::Genesis => "genesis",
            Self::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Capability Mask
// ============================================================================

/// Bitmask over the seven capability bits.
///
/// # Invariants
/// - Only the low seven bits are meaningful; the rest are masked off at
///   construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMask(u32);

impl CapabilityMask {
    /// All seven capability bits set.
    pub const ALL: Self = Self(0x7f);
    /// No capabilities.
    pub const NONE: Self = Self(0);

    /// Creates a mask from raw bits, discarding undefined high bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns a mask with one capability added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns a mask with one capability removed.
    #[must_use]
    pub const fn without(self, capability: Capability) -> Self {
        Self(self.0 & !capability.bit())
    }

    /// Returns whether a capability is present.
    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Returns the bits declared here that are absent from `allowed`.
    ///
    /// A non-empty excess is grounds to reject a plugin load.
    #[must_use]
    pub const fn excess_over(self, allowed: Self) -> Self {
        Self(self.0 & !allowed.0)
    }

    /// Returns whether the mask has no bits set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Lists the capabilities present, in bit order.
    #[must_use]
    pub fn capabilities(self) -> Vec<Capability> {
        Capability::ALL.into_iter().filter(|capability| self.contains(*capability)).collect()
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> =
            self.capabilities().into_iter().map(Capability::as_str).collect();
        write!(f, "[{}]", labels.join(","))
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::*;

    #[test]
    fn from_bits_discards_undefined_high_bits() {
        let mask = CapabilityMask::from_bits(0xffff_ff80 | Capability::Shell.bit());
        assert_eq!(mask.bits(), Capability::Shell.bit());
    }

    #[test]
    fn excess_over_flags_undeclared_bits() {
        let declared = CapabilityMask::NONE.with(Capability::FileRead).with(Capability::Network);
        let allowed = CapabilityMask::NONE.with(Capability::FileRead);
        let excess = declared.excess_over(allowed);
        assert!(excess.contains(Capability::Network));
        assert!(!excess.contains(Capability::FileRead));
        assert!(!excess.is_empty());
    }

    #[test]
    fn all_mask_contains_every_capability() {
        for capability in Capability::ALL {
            assert!(CapabilityMask::ALL.contains(capability));
        }
        assert!(CapabilityMask::ALL.excess_over(CapabilityMask::ALL).is_empty());
    }

    #[test]
    fn display_lists_capability_labels() {
        let mask = CapabilityMask::NONE.with(Capability::Genesis).with(Capability::Shell);
        assert_eq!(mask.to_string(), "[shell,genesis]");
    }
}
