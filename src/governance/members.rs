use std::collections::BTreeSet;

/// Immutable registry of addresses empowered to attest outcomes.
///
/// Entries are stored trimmed and lowercased so membership is
/// case-insensitive. Nothing is validated: a malformed entry simply never
/// matches a recovered address. Membership changes mean building a new
/// `Governance`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Governance {
    members: BTreeSet<String>,
}

impl Governance {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members
            .into_iter()
            .map(|m| normalize_address(&m.into()))
            .collect();
        Self { members }
    }

    /// Case-insensitive membership test. Always false for an empty set.
    pub fn is_member(&self, address: &str) -> bool {
        self.members.contains(&normalize_address(address))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Normalized members in sorted order
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }
}

/// Comparison form of an address
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}
