//! SNOMED CT Identifier (SCTID) type and structure.
//!
//! An SCTID is an item id followed by an optional seven digit namespace, a
//! two digit partition id and a Verhoeff check digit.

/// A SNOMED CT identifier (SCTID).
///
/// # Examples
///
/// ```
/// use snomed_types::{is_valid_sctid, SctId};
///
/// let concept_id: SctId = 73211009; // Diabetes mellitus
/// assert!(is_valid_sctid(concept_id));
/// ```
pub type SctId = u64;

/// Component type encoded in the partition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Concept ids.
    Concept,
    /// Description ids.
    Description,
    /// Relationship ids.
    Relationship,
}

impl Partition {
    fn digit(self) -> char {
        match self {
            Self::Concept => '0',
            Self::Description => '1',
            Self::Relationship => '2',
        }
    }
}

const D: [[usize; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

const P: [[usize; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 7, 8, 0, 6],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const INV: [usize; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

/// Computes the Verhoeff check digit for a string of decimal digits.
///
/// Returns `None` if `digits` contains anything other than `0`-`9`.
///
/// ```
/// use snomed_types::verhoeff_check_digit;
///
/// assert_eq!(verhoeff_check_digit("7321100"), Some(9));
/// ```
pub fn verhoeff_check_digit(digits: &str) -> Option<u8> {
    let mut check = 0;
    for (i, ch) in digits.chars().rev().enumerate() {
        let digit = ch.to_digit(10)? as usize;
        check = D[check][P[(i + 1) % 8][digit]];
    }
    Some(INV[check] as u8)
}

/// Whether the last digit of `id` is its Verhoeff check digit.
pub fn is_valid_sctid(id: SctId) -> bool {
    let digits = id.to_string();
    if digits.len() < 6 {
        return false;
    }
    let mut check = 0;
    for (i, ch) in digits.chars().rev().enumerate() {
        let Some(digit) = ch.to_digit(10) else {
            return false;
        };
        check = D[check][P[i % 8][digit as usize]];
    }
    check == 0
}

/// The component type an id was minted for.
pub fn partition_of(id: SctId) -> Option<Partition> {
    let digits = id.to_string();
    if digits.len() < 6 {
        return None;
    }
    match &digits[digits.len() - 2..digits.len() - 1] {
        "0" => Some(Partition::Concept),
        "1" => Some(Partition::Description),
        "2" => Some(Partition::Relationship),
        _ => None,
    }
}

/// Assembles an id from its item id, namespace and partition.
///
/// ```
/// use snomed_types::{build_sctid, Partition};
///
/// assert_eq!(build_sctid(73211, None, Partition::Concept), Some(73211009));
/// ```
pub fn build_sctid(item_id: u64, namespace: Option<u32>, partition: Partition) -> Option<SctId> {
    let body = match namespace {
        Some(namespace) => format!("{item_id}{namespace:07}1{}", partition.digit()),
        None => format!("{item_id}0{}", partition.digit()),
    };
    let check = verhoeff_check_digit(&body)?;
    format!("{body}{check}").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_digits() {
        assert_eq!(verhoeff_check_digit("1000"), Some(3));
        assert_eq!(verhoeff_check_digit("100100"), Some(0));
        assert_eq!(verhoeff_check_digit("1010000011"), Some(1));
        assert_eq!(verhoeff_check_digit("12a"), None);
    }

    #[test]
    fn test_known_ids_are_valid() {
        assert!(is_valid_sctid(73211009));
        assert!(is_valid_sctid(138875005));
        assert!(is_valid_sctid(64572001));
        assert!(is_valid_sctid(900000000000509007));
        assert!(!is_valid_sctid(73211008));
        assert!(!is_valid_sctid(12));
    }

    #[test]
    fn test_build_sctid_partitions() {
        let concept = build_sctid(1001, None, Partition::Concept).unwrap();
        let description = build_sctid(1001, None, Partition::Description).unwrap();
        let relationship = build_sctid(1001, None, Partition::Relationship).unwrap();

        for id in [concept, description, relationship] {
            assert!(is_valid_sctid(id), "{id} should validate");
        }
        assert_eq!(partition_of(concept), Some(Partition::Concept));
        assert_eq!(partition_of(description), Some(Partition::Description));
        assert_eq!(partition_of(relationship), Some(Partition::Relationship));
    }

    #[test]
    fn test_build_sctid_with_namespace() {
        let id = build_sctid(42, Some(1000154), Partition::Description).unwrap();
        assert!(id.to_string().starts_with("42100015411"));
        assert!(is_valid_sctid(id));
        assert_eq!(partition_of(id), Some(Partition::Description));
    }
}
