//! Wagers grouped by pick
//!
//! The bet-bookkeeping side of the system hands the resolver a table of
//! pick label -> wagers. Label insertion order is preserved because
//! resolution logic commonly falls back to "the first pick".

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single player wager. Immutable once placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wager {
    /// Pick label this wager backs
    pub pick: String,
    /// Player address
    pub player: String,
    /// Token contract address the stake is denominated in
    pub token_address: String,
    /// Stake in the token's base units
    pub amount: u64,
}

impl Wager {
    pub fn new(pick: &str, player: &str, token_address: &str, amount: u64) -> Self {
        Self {
            pick: pick.to_string(),
            player: player.to_string(),
            token_address: token_address.to_string(),
            amount,
        }
    }
}

/// Insertion-ordered mapping of pick label -> wagers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PickTable {
    entries: Vec<(String, Vec<Wager>)>,
}

impl PickTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pick with no wagers yet. No-op if the label exists.
    pub fn add_pick(&mut self, label: &str) {
        if self.position(label).is_none() {
            self.entries.push((label.to_string(), Vec::new()));
        }
    }

    /// Append a wager under its own pick label, creating the pick if needed
    pub fn place(&mut self, wager: Wager) {
        match self.position(&wager.pick) {
            Some(i) => self.entries[i].1.push(wager),
            None => self.entries.push((wager.pick.clone(), vec![wager])),
        }
    }

    pub fn get(&self, label: &str) -> Option<&[Wager]> {
        self.position(label).map(|i| self.entries[i].1.as_slice())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.position(label).is_some()
    }

    /// Labels in insertion order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(label, _)| label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Wager])> {
        self.entries.iter().map(|(label, wagers)| (label.as_str(), wagers.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all stakes on a pick; `None` if the sum overflows u64
    pub fn total_staked(&self, label: &str) -> Option<u64> {
        self.get(label)
            .unwrap_or_default()
            .iter()
            .try_fold(0u64, |total, w| total.checked_add(w.amount))
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.entries.iter().position(|(l, _)| l == label)
    }
}

impl Serialize for PickTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, wagers) in &self.entries {
            map.serialize_entry(label, wagers)?;
        }
        map.end()
    }
}

struct PickTableVisitor;

impl<'de> Visitor<'de> for PickTableVisitor {
    type Value = PickTable;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of pick label to wager list")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<PickTable, A::Error> {
        let mut table = PickTable::new();
        while let Some((label, wagers)) = access.next_entry::<String, Vec<Wager>>()? {
            table.add_pick(&label);
            if let Some(i) = table.position(&label) {
                table.entries[i].1.extend(wagers);
            }
        }
        Ok(table)
    }
}

impl<'de> Deserialize<'de> for PickTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PickTableVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";

    #[test]
    fn test_insertion_order_preserved() {
        let mut picks = PickTable::new();
        picks.place(Wager::new("zebra", "0x01", TOKEN, 5));
        picks.place(Wager::new("apple", "0x02", TOKEN, 7));
        picks.place(Wager::new("zebra", "0x03", TOKEN, 1));

        assert_eq!(picks.labels().collect::<Vec<_>>(), vec!["zebra", "apple"]);
        assert_eq!(picks.get("zebra").unwrap().len(), 2);
        assert_eq!(picks.total_staked("zebra"), Some(6));
        assert_eq!(picks.total_staked("missing"), Some(0));
    }

    #[test]
    fn test_total_staked_reports_overflow() {
        let mut picks = PickTable::new();
        picks.place(Wager::new("home", "0x01", TOKEN, u64::MAX));
        picks.place(Wager::new("home", "0x02", TOKEN, 1));
        picks.place(Wager::new("away", "0x03", TOKEN, u64::MAX));

        assert_eq!(picks.total_staked("home"), None);
        assert_eq!(picks.total_staked("away"), Some(u64::MAX));
    }

    #[test]
    fn test_json_roundtrip_keeps_document_order() {
        let json = r#"{
            "test_pick2": [],
            "test_pick": [{"pick": "test_pick", "player": "0x01", "tokenAddress": "0xaa", "amount": 10}]
        }"#;
        let picks: PickTable = serde_json::from_str(json).unwrap();
        assert_eq!(picks.labels().collect::<Vec<_>>(), vec!["test_pick2", "test_pick"]);
        assert_eq!(picks.get("test_pick").unwrap()[0].token_address, "0xaa");

        let out = serde_json::to_string(&picks).unwrap();
        assert!(out.find("test_pick2").unwrap() < out.find("\"test_pick\"").unwrap());
    }

    #[test]
    fn test_add_pick_is_idempotent() {
        let mut picks = PickTable::new();
        picks.add_pick("yes");
        picks.add_pick("yes");
        assert_eq!(picks.len(), 1);
        assert!(picks.contains("yes"));
        assert!(picks.get("yes").unwrap().is_empty());
    }
}
