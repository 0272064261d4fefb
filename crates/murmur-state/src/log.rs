//! Message log and anti-entropy diff

use std::collections::BTreeMap;

use murmur_core::{Origin, Rumor, SeqNo, StatusVector};

/// Result of comparing the local log against a remote status vector
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffOutcome {
    /// We hold a rumor the remote lacks; this is the one to send next
    LocalHasExtra(Rumor),
    /// The remote holds something we lack
    RemoteHasExtra,
    /// Both sides claim the same knowledge
    Equal,
}

/// Append-only rumor store keyed by (origin, sequence number)
#[derive(Debug, Default)]
pub struct MessageLog {
    rumors: BTreeMap<Origin, BTreeMap<SeqNo, Rumor>>,
    len: usize,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rumor. Returns `true` if it was new; a rumor whose
    /// (origin, seq) is already held is rejected without touching the log.
    pub fn record(&mut self, rumor: Rumor) -> bool {
        let by_seq = self.rumors.entry(rumor.origin.clone()).or_default();
        if by_seq.contains_key(&rumor.seq) {
            return false;
        }

        tracing::debug!(
            origin = %rumor.origin,
            seq = rumor.seq.value(),
            route = rumor.is_route(),
            "recorded new rumor"
        );
        by_seq.insert(rumor.seq, rumor);
        self.len += 1;
        true
    }

    pub fn get(&self, origin: &str, seq: SeqNo) -> Option<&Rumor> {
        self.rumors.get(origin).and_then(|by_seq| by_seq.get(&seq))
    }

    pub fn contains(&self, origin: &str, seq: SeqNo) -> bool {
        self.get(origin, seq).is_some()
    }

    /// Lowest sequence number from `origin` that is not part of the
    /// contiguous run starting at 1. Rumors past a gap do not count.
    pub fn next_needed(&self, origin: &str) -> SeqNo {
        let mut need = SeqNo::FIRST;
        if let Some(by_seq) = self.rumors.get(origin) {
            for seq in by_seq.keys() {
                if *seq == need {
                    need = need.next();
                } else if *seq > need {
                    break;
                }
            }
        }
        need
    }

    /// Local status vector: one entry per origin we hold anything from
    pub fn status(&self) -> StatusVector {
        self.rumors
            .keys()
            .map(|origin| (origin.clone(), self.next_needed(origin.as_str())))
            .collect()
    }

    /// Compare against a remote status vector.
    ///
    /// Origins are scanned in order; the first one where the remote is
    /// behind yields the exact rumor it needs next (the lowest held rumor if
    /// the remote lists nothing for that origin).
    pub fn diff(&self, remote: &StatusVector) -> DiffOutcome {
        self.diff_with(remote, |_| true)
    }

    /// Like [`MessageLog::diff`], but an origin whose next rumor for the
    /// remote fails `shareable` is passed over as if both sides agreed on it.
    pub fn diff_with<F>(&self, remote: &StatusVector, shareable: F) -> DiffOutcome
    where
        F: Fn(&Rumor) -> bool,
    {
        let mut remote_has_extra = false;

        for (origin, by_seq) in &self.rumors {
            let local_need = self.next_needed(origin.as_str());
            match remote.get(origin.as_str()) {
                None => {
                    if let Some(first) = by_seq.values().next().filter(|r| shareable(*r)) {
                        return DiffOutcome::LocalHasExtra(first.clone());
                    }
                }
                Some(remote_need) if remote_need < local_need => {
                    if let Some(rumor) = by_seq.get(&remote_need) {
                        if shareable(rumor) {
                            return DiffOutcome::LocalHasExtra(rumor.clone());
                        }
                        continue;
                    }
                    // Everything below local_need is held by construction.
                    tracing::error!(
                        origin = %origin,
                        remote_need = remote_need.value(),
                        local_need = local_need.value(),
                        "status claims a rumor the log cannot produce"
                    );
                    remote_has_extra = true;
                }
                Some(remote_need) if remote_need > local_need => {
                    remote_has_extra = true;
                }
                Some(_) => {}
            }
        }

        if remote_has_extra || remote.origins().any(|o| !self.rumors.contains_key(o)) {
            DiffOutcome::RemoteHasExtra
        } else {
            DiffOutcome::Equal
        }
    }

    /// All rumors from one origin in sequence order
    pub fn rumors_from(&self, origin: &str) -> impl Iterator<Item = &Rumor> {
        self.rumors
            .get(origin)
            .into_iter()
            .flat_map(|by_seq| by_seq.values())
    }

    pub fn origins(&self) -> impl Iterator<Item = &Origin> {
        self.rumors.keys()
    }

    /// Total number of rumors held
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chat(origin: &str, seq: u32) -> Rumor {
        Rumor::chat(Origin::from(origin), SeqNo::new(seq), format!("{origin}-{seq}"))
    }

    fn log_with(entries: &[(&str, u32)]) -> MessageLog {
        let mut log = MessageLog::new();
        for (origin, seq) in entries {
            log.record(chat(origin, *seq));
        }
        log
    }

    #[test]
    fn test_record_rejects_duplicates() {
        let mut log = MessageLog::new();
        assert!(log.record(chat("a", 1)));

        let mut altered = chat("a", 1);
        altered.body = Some("different".into());
        assert!(!log.record(altered));

        assert_eq!(log.len(), 1);
        assert_eq!(log.get("a", SeqNo::FIRST).unwrap().body.as_deref(), Some("a-1"));
    }

    #[test]
    fn test_status_stops_at_gap() {
        let log = log_with(&[("a", 1), ("a", 2), ("a", 4), ("b", 3)]);
        let status = log.status();
        assert_eq!(status.get("a"), Some(SeqNo::new(3)));
        assert_eq!(status.get("b"), Some(SeqNo::new(1)));
    }

    #[test]
    fn test_filling_gap_advances_past_it() {
        let mut log = log_with(&[("a", 1), ("a", 3)]);
        assert_eq!(log.next_needed("a"), SeqNo::new(2));
        log.record(chat("a", 2));
        assert_eq!(log.next_needed("a"), SeqNo::new(4));
    }

    #[test]
    fn test_diff_local_ahead_returns_needed_rumor() {
        let a = log_with(&[("x", 1), ("x", 2), ("x", 3), ("x", 4)]);
        let b = log_with(&[("x", 1), ("x", 2)]);

        assert_eq!(a.status().get("x"), Some(SeqNo::new(5)));
        assert_eq!(b.status().get("x"), Some(SeqNo::new(3)));

        match a.diff(&b.status()) {
            DiffOutcome::LocalHasExtra(rumor) => {
                assert_eq!(rumor.origin.as_str(), "x");
                assert_eq!(rumor.seq, SeqNo::new(3));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(b.diff(&a.status()), DiffOutcome::RemoteHasExtra);
    }

    #[test]
    fn test_diff_remote_missing_origin_gets_lowest_rumor() {
        let a = log_with(&[("x", 3), ("x", 4)]);
        let empty = MessageLog::new();

        match a.diff(&empty.status()) {
            DiffOutcome::LocalHasExtra(rumor) => assert_eq!(rumor.seq, SeqNo::new(3)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_diff_remote_lists_unknown_origin() {
        let a = log_with(&[("x", 1)]);
        let b = log_with(&[("x", 1), ("y", 1)]);
        assert_eq!(a.diff(&b.status()), DiffOutcome::RemoteHasExtra);
    }

    #[test]
    fn test_diff_equal() {
        let a = log_with(&[("x", 1), ("y", 1), ("y", 2)]);
        let b = log_with(&[("y", 1), ("y", 2), ("x", 1)]);
        assert_eq!(a.diff(&b.status()), DiffOutcome::Equal);
        assert_eq!(MessageLog::new().diff(&StatusVector::new()), DiffOutcome::Equal);
    }

    #[test]
    fn test_diff_gap_only_counts_contiguous_prefix() {
        // b holds x3 behind a gap, so it still advertises x:1
        let a = log_with(&[("x", 1)]);
        let b = log_with(&[("x", 3)]);

        match a.diff(&b.status()) {
            DiffOutcome::LocalHasExtra(rumor) => assert_eq!(rumor.seq, SeqNo::FIRST),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(b.diff(&a.status()), DiffOutcome::RemoteHasExtra);
    }

    #[test]
    fn test_diff_with_skips_unshareable_origins() {
        let a = log_with(&[("x", 1), ("y", 1)]);
        let empty = StatusVector::new();

        match a.diff_with(&empty, |r| r.origin.as_str() != "x") {
            DiffOutcome::LocalHasExtra(rumor) => assert_eq!(rumor.origin.as_str(), "y"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(a.diff_with(&empty, |_| false), DiffOutcome::Equal);
    }

    #[test]
    fn test_diff_unproducible_claim_is_remote_extra() {
        let a = log_with(&[("x", 1), ("x", 2)]);
        let bogus: StatusVector = [(Origin::from("x"), SeqNo::new(0))].into_iter().collect();
        assert_eq!(a.diff(&bogus), DiffOutcome::RemoteHasExtra);
    }

    fn entries() -> impl Strategy<Value = Vec<(u8, u32)>> {
        proptest::collection::vec((0u8..3, 1u32..12), 0..40)
    }

    fn build(entries: &[(u8, u32)]) -> MessageLog {
        let mut log = MessageLog::new();
        for (o, s) in entries {
            log.record(chat(&format!("o{o}"), *s));
        }
        log
    }

    proptest! {
        #[test]
        fn prop_record_is_idempotent(entries in entries(), origin in 0u8..3, seq in 1u32..12) {
            let mut log = build(&entries);
            let rumor = chat(&format!("o{origin}"), seq);
            log.record(rumor.clone());
            let before = log.status();
            let len = log.len();
            prop_assert!(!log.record(rumor));
            prop_assert_eq!(log.status(), before);
            prop_assert_eq!(log.len(), len);
        }

        #[test]
        fn prop_status_advances_by_one_on_next_needed(entries in entries(), origin in 0u8..3) {
            let mut log = build(&entries);
            let name = format!("o{origin}");
            let need = log.next_needed(&name);
            let held_next = log.contains(&name, need.next());
            log.record(chat(&name, need.value()));
            let after = log.next_needed(&name);
            prop_assert!(after > need);
            if !held_next {
                prop_assert_eq!(after, need.next());
            }
            // a rumor further along only advances if it closes the gap
            let far = after.value() + 1;
            log.record(chat(&name, far));
            prop_assert_eq!(log.next_needed(&name), after);
        }

        #[test]
        fn prop_diff_never_equal_when_local_ahead(a in entries(), b in entries()) {
            let la = build(&a);
            let lb = build(&b);
            if let DiffOutcome::LocalHasExtra(_) = la.diff(&lb.status()) {
                prop_assert_ne!(lb.diff(&la.status()), DiffOutcome::Equal);
            }
        }
    }
}
