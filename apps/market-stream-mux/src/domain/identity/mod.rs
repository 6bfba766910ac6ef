//! Identity Binding
//!
//! The wallet address that identity-scoped subscriptions are parameterised
//! with. Addresses are normalised to lowercase so comparisons against inbound
//! payloads are case-insensitive.

/// Sentinel address used on the wire while no identity is bound.
pub const NO_IDENTITY: &str = "0x0000000000000000000000000000000000000000";

/// Current identity, or the absence of one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IdentityBinding {
    address: Option<String>,
}

impl IdentityBinding {
    /// No identity bound.
    #[must_use]
    pub const fn unbound() -> Self {
        Self { address: None }
    }

    /// Bind an address. Blank input yields an unbound identity.
    #[must_use]
    pub fn bound(address: &str) -> Self {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Self::unbound();
        }
        Self {
            address: Some(trimmed.to_ascii_lowercase()),
        }
    }

    /// Bind an optional address.
    #[must_use]
    pub fn from_option(address: Option<&str>) -> Self {
        address.map_or_else(Self::unbound, Self::bound)
    }

    /// The bound address, normalised to lowercase.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// The address to put on the wire: the bound address or the sentinel.
    #[must_use]
    pub fn resolved(&self) -> &str {
        self.address.as_deref().unwrap_or(NO_IDENTITY)
    }

    /// Whether an address is bound.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.address.is_some()
    }

    /// Case-insensitive comparison against an address seen on the wire.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.eq_ignore_ascii_case(self.resolved())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_address_is_lowercased() {
        let binding = IdentityBinding::bound("  0xAbCdEf  ");
        assert_eq!(binding.address(), Some("0xabcdef"));
        assert!(binding.is_bound());
    }

    #[test]
    fn blank_address_is_unbound() {
        assert_eq!(IdentityBinding::bound("   "), IdentityBinding::unbound());
        assert_eq!(IdentityBinding::from_option(None), IdentityBinding::unbound());
    }

    #[test]
    fn unbound_resolves_to_sentinel() {
        let binding = IdentityBinding::unbound();
        assert_eq!(binding.resolved(), NO_IDENTITY);
        assert!(binding.matches(NO_IDENTITY));
    }

    #[test]
    fn matches_ignores_case() {
        let binding = IdentityBinding::bound("0xabc");
        assert!(binding.matches("0xABC"));
        assert!(!binding.matches("0xabd"));
    }
}
