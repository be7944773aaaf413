//! Store capability flags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single capability a store reports or is refined to by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Characteristic {
    /// Never receives writes, deletes or clears.
    ReadOnly,
    /// Never consulted for reads.
    WriteOnly,
    /// Supports publishing entries/keys and `size`.
    BulkRead,
    Transactional,
    /// Receives real segment ids and segment add/remove calls.
    Segmentable,
    /// Tracks expiry itself and supports `purge_expired`.
    ExpirationAware,
}

impl Characteristic {
    pub const ALL: [Characteristic; 6] = [
        Characteristic::ReadOnly,
        Characteristic::WriteOnly,
        Characteristic::BulkRead,
        Characteristic::Transactional,
        Characteristic::Segmentable,
        Characteristic::ExpirationAware,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Immutable-by-convention set of [`Characteristic`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Characteristics(u8);

impl Characteristics {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn of(flags: &[Characteristic]) -> Self {
        flags.iter().fold(Self::empty(), |set, c| set.with(*c))
    }

    #[must_use]
    pub const fn contains(self, c: Characteristic) -> bool {
        self.0 & c.bit() != 0
    }

    #[must_use]
    pub const fn with(self, c: Characteristic) -> Self {
        Self(self.0 | c.bit())
    }

    #[must_use]
    pub const fn without(self, c: Characteristic) -> Self {
        Self(self.0 & !c.bit())
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Characteristic> {
        Characteristic::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl fmt::Debug for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Characteristic> for Characteristics {
    fn from_iter<I: IntoIterator<Item = Characteristic>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_and_without_are_symmetric() {
        let set = Characteristics::empty()
            .with(Characteristic::BulkRead)
            .with(Characteristic::Segmentable);

        assert!(set.contains(Characteristic::BulkRead));
        assert!(set.contains(Characteristic::Segmentable));
        assert!(!set.contains(Characteristic::ReadOnly));

        let stripped = set.without(Characteristic::BulkRead);
        assert!(!stripped.contains(Characteristic::BulkRead));
        assert!(stripped.contains(Characteristic::Segmentable));
    }

    #[test]
    fn iter_yields_declared_order() {
        let set = Characteristics::of(&[
            Characteristic::ExpirationAware,
            Characteristic::ReadOnly,
        ]);
        let flags: Vec<_> = set.iter().collect();
        assert_eq!(
            flags,
            vec![Characteristic::ReadOnly, Characteristic::ExpirationAware]
        );
    }

    #[test]
    fn empty_set() {
        assert!(Characteristics::empty().is_empty());
        assert_eq!(format!("{:?}", Characteristics::empty()), "{}");
    }
}
