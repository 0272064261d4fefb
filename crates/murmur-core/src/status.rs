//! Status vectors
//!
//! A status vector maps each origin to the lowest sequence number not yet
//! held from it. It is both the local summary a node advertises and the
//! remote claim it reconciles against.

use std::collections::BTreeMap;

use crate::{Origin, SeqNo};

/// Origin -> "next needed" sequence number
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusVector {
    wants: BTreeMap<Origin, SeqNo>,
}

impl StatusVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next needed sequence number for an origin, if the origin is listed
    pub fn get(&self, origin: &str) -> Option<SeqNo> {
        self.wants.get(origin).copied()
    }

    pub fn insert(&mut self, origin: Origin, next_needed: SeqNo) {
        self.wants.insert(origin, next_needed);
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.wants.contains_key(origin)
    }

    pub fn len(&self) -> usize {
        self.wants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wants.is_empty()
    }

    /// Iterate in origin order
    pub fn iter(&self) -> impl Iterator<Item = (&Origin, SeqNo)> {
        self.wants.iter().map(|(o, s)| (o, *s))
    }

    pub fn origins(&self) -> impl Iterator<Item = &Origin> {
        self.wants.keys()
    }
}

impl FromIterator<(Origin, SeqNo)> for StatusVector {
    fn from_iter<I: IntoIterator<Item = (Origin, SeqNo)>>(iter: I) -> Self {
        StatusVector {
            wants: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a StatusVector {
    type Item = (&'a Origin, &'a SeqNo);
    type IntoIter = std::collections::btree_map::Iter<'a, Origin, SeqNo>;

    fn into_iter(self) -> Self::IntoIter {
        self.wants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lookup() {
        let status: StatusVector = [
            (Origin::from("a"), SeqNo::new(3)),
            (Origin::from("b"), SeqNo::new(1)),
        ]
        .into_iter()
        .collect();

        assert_eq!(status.get("a"), Some(SeqNo::new(3)));
        assert_eq!(status.get("c"), None);
        assert_eq!(status.len(), 2);
        assert_eq!(
            status.origins().map(|o| o.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
