//! Static sound-alike table.
//!
//! Each row is `canonical → alternates`. A row forms one group; two words are
//! homophones when some group contains both, which makes the lookup symmetric.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::normalize::normalize;

const ENTRIES: &[(&str, &[&str])] = &[
    // Numbers
    ("0", &["zero", "oh"]),
    ("1", &["one", "won"]),
    ("2", &["two", "to", "too"]),
    ("3", &["three", "tree"]),
    ("4", &["four", "for", "fore"]),
    ("5", &["five"]),
    ("6", &["six", "sicks"]),
    ("7", &["seven"]),
    ("8", &["eight", "ate"]),
    ("9", &["nine"]),
    ("10", &["ten"]),
    ("11", &["eleven"]),
    ("12", &["twelve"]),
    ("13", &["thirteen"]),
    ("14", &["fourteen"]),
    ("15", &["fifteen"]),
    ("16", &["sixteen"]),
    ("17", &["seventeen"]),
    ("18", &["eighteen"]),
    ("19", &["nineteen"]),
    ("20", &["twenty"]),
    ("30", &["thirty"]),
    ("40", &["forty", "fourty"]),
    ("50", &["fifty"]),
    ("100", &["hundred", "one hundred"]),
    // Sound-alikes
    ("there", &["their", "theyre"]),
    ("write", &["right", "rite"]),
    ("see", &["sea", "c"]),
    ("be", &["bee", "b"]),
    ("are", &["r"]),
    ("you", &["u", "ewe"]),
    ("why", &["y"]),
    ("eye", &["i", "aye"]),
    ("know", &["no"]),
    ("knew", &["new"]),
    ("knight", &["night"]),
    ("hear", &["here"]),
    ("by", &["buy", "bye"]),
    ("blue", &["blew"]),
    ("red", &["read"]),
    ("sun", &["son"]),
    ("flower", &["flour"]),
    ("meet", &["meat"]),
    ("hair", &["hare"]),
    ("bear", &["bare"]),
    ("pear", &["pair", "pare"]),
    ("deer", &["dear"]),
    ("tail", &["tale"]),
    ("mail", &["male"]),
    ("road", &["rode", "rowed"]),
    ("week", &["weak"]),
    ("whole", &["hole"]),
    ("wood", &["would"]),
    ("where", &["wear", "ware"]),
    ("which", &["witch"]),
    ("whether", &["weather"]),
    ("plane", &["plain"]),
    ("sail", &["sale"]),
    ("rain", &["reign", "rein"]),
    ("peace", &["piece"]),
    ("dough", &["doe"]),
    ("flea", &["flee"]),
    ("hour", &["our"]),
    ("made", &["maid"]),
    ("nose", &["knows"]),
    ("so", &["sew", "sow"]),
    ("stair", &["stare"]),
    ("steal", &["steel"]),
    ("toe", &["tow"]),
    ("way", &["weigh"]),
    ("wait", &["weight"]),
    ("cell", &["sell"]),
    ("cent", &["sent", "scent"]),
];

/// Read-only homophone groups, built once on first use.
#[derive(Debug)]
pub struct HomophoneTable {
    /// normalized word → indices of the groups it belongs to
    membership: HashMap<String, Vec<usize>>,
}

impl HomophoneTable {
    fn build(entries: &[(&str, &[&str])]) -> Self {
        let mut membership: HashMap<String, Vec<usize>> = HashMap::new();
        for (group, (canonical, alternates)) in entries.iter().enumerate() {
            for word in std::iter::once(canonical).chain(alternates.iter()) {
                let groups = membership.entry(normalize(word)).or_default();
                if !groups.contains(&group) {
                    groups.push(group);
                }
            }
        }
        Self { membership }
    }

    /// Both arguments must already be normalized.
    pub fn are_homophones(&self, a: &str, b: &str) -> bool {
        let (Some(left), Some(right)) = (self.membership.get(a), self.membership.get(b)) else {
            return false;
        };
        left.iter().any(|g| right.contains(g))
    }

    /// Raw table rows, for diagnostics and tests.
    pub fn entries(&self) -> &'static [(&'static str, &'static [&'static str])] {
        ENTRIES
    }
}

pub fn table() -> &'static HomophoneTable {
    static TABLE: OnceLock<HomophoneTable> = OnceLock::new();
    TABLE.get_or_init(|| HomophoneTable::build(ENTRIES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_and_words_share_a_group() {
        let t = table();
        assert!(t.are_homophones("2", "too"));
        assert!(t.are_homophones("too", "two"));
        assert!(t.are_homophones("to", "2"));
    }

    #[test]
    fn apostrophes_are_normalized_at_build() {
        assert!(table().are_homophones("theyre", "their"));
    }

    #[test]
    fn unrelated_words_are_not_homophones() {
        let t = table();
        assert!(!t.are_homophones("cat", "bat"));
        assert!(!t.are_homophones("two", "three"));
        assert!(!t.are_homophones("unknown", "unknown"));
    }

    #[test]
    fn every_row_is_symmetric() {
        let t = table();
        for (canonical, alternates) in t.entries() {
            let k = normalize(canonical);
            for alt in alternates.iter() {
                let v = normalize(alt);
                assert!(t.are_homophones(&k, &v), "{k} -> {v}");
                assert!(t.are_homophones(&v, &k), "{v} -> {k}");
            }
        }
    }
}
