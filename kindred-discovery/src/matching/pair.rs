use uuid::Uuid;

const SEPARATOR: char = '_';

/// Canonical identifier of an unordered user pair: the smaller id, `_`, the
/// larger id. Both participants compute the same key independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    key: String,
    low: Uuid,
    high: Uuid,
}

impl PairKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        // Uuid ordering is bytewise, which matches the ordering of the
        // lowercase hyphenated strings.
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            key: format!("{low}{SEPARATOR}{high}"),
            low,
            high,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn into_string(self) -> String {
        self.key
    }

    /// The two members, smaller first.
    pub fn members(&self) -> (Uuid, Uuid) {
        (self.low, self.high)
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
        assert_eq!(PairKey::new(a, b).as_str(), PairKey::new(b, a).as_str());
    }

    #[test]
    fn smaller_id_first() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-00000000000a").unwrap();
        let b = Uuid::parse_str("ffffffff-0000-0000-0000-000000000001").unwrap();
        let key = PairKey::new(b, a);
        assert_eq!(
            key.as_str(),
            "00000000-0000-0000-0000-00000000000a_ffffffff-0000-0000-0000-000000000001"
        );
        assert_eq!(key.members(), (a, b));
    }

    #[test]
    fn string_order_matches_uuid_order() {
        for _ in 0..32 {
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            assert_eq!(a < b, a.to_string() < b.to_string());
        }
    }
}
