use std::fmt;

use log::{debug, info, warn};
use serde::Serialize;

use crate::face::FaceId;
use crate::name::{Name, SharedName};
use crate::trie::{Inserted, Trie, TrieError, TriePolicy};

/// Health grade of a next hop, as assigned by the forwarding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NextHopStatus {
    #[default]
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextHop {
    pub face: FaceId,
    /// Routing metric, lower is preferred.
    pub metric: i32,
    pub status: NextHopStatus,
}

/// Forwarding entry: a prefix and its next hops.
///
/// Next hops are unique per face and kept sorted by `(metric, face)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibEntry {
    prefix: SharedName,
    next_hops: Vec<NextHop>,
}

impl FibEntry {
    pub fn new(prefix: SharedName) -> Self {
        Self {
            prefix,
            next_hops: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &SharedName {
        &self.prefix
    }

    pub fn next_hops(&self) -> &[NextHop] {
        &self.next_hops
    }

    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty()
    }

    pub fn contains(&self, face: FaceId) -> bool {
        self.next_hops.iter().any(|hop| hop.face == face)
    }

    pub fn metric(&self, face: FaceId) -> Option<i32> {
        self.next_hops
            .iter()
            .find(|hop| hop.face == face)
            .map(|hop| hop.metric)
    }

    /// Lowest-metric next hop that has not been marked red.
    pub fn best(&self) -> Option<&NextHop> {
        self.next_hops
            .iter()
            .find(|hop| hop.status != NextHopStatus::Red)
    }

    /// False once every next hop has been invalidated.
    pub fn is_valid(&self) -> bool {
        self.best().is_some()
    }

    /// Insert `face` with `metric`, or update the metric of an existing hop.
    pub fn add_or_update_routing_metric(&mut self, face: FaceId, metric: i32) {
        match self.next_hops.iter_mut().find(|hop| hop.face == face) {
            Some(hop) => {
                hop.metric = metric;
                hop.status = NextHopStatus::Green;
            }
            None => self.next_hops.push(NextHop {
                face,
                metric,
                status: NextHopStatus::Green,
            }),
        }
        self.next_hops.sort_by_key(|hop| (hop.metric, hop.face));
    }

    pub fn update_status(&mut self, face: FaceId, status: NextHopStatus) -> bool {
        match self.next_hops.iter_mut().find(|hop| hop.face == face) {
            Some(hop) => {
                hop.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove_face(&mut self, face: FaceId) -> bool {
        let before = self.next_hops.len();
        self.next_hops.retain(|hop| hop.face != face);
        self.next_hops.len() != before
    }

    /// Mark every next hop red without removing it.
    pub fn invalidate(&mut self) {
        for hop in &mut self.next_hops {
            hop.status = NextHopStatus::Red;
        }
    }
}

impl fmt::Display for FibEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t", self.prefix)?;
        for (i, hop) in self.next_hops.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}(metric {}, {:?})", hop.face, hop.metric, hop.status)?;
        }
        Ok(())
    }
}

/// Receives FIB lifecycle notifications.
pub trait FibObserver {
    /// Fired once when a prefix gets its entry, before its first next hop is attached.
    fn did_add_fib_entry(&mut self, _entry: &FibEntry) {}

    /// Fired just before an entry is erased.
    fn will_remove_fib_entry(&mut self, _entry: &FibEntry) {}
}

impl FibObserver for () {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FibError {
    #[error("Cannot add a route for the empty prefix")]
    EmptyPrefix,
    #[error(transparent)]
    Table(#[from] TrieError),
}

/// Forwarding Information Base keyed by name prefix.
#[derive(Debug, Default)]
pub struct Fib {
    trie: Trie<FibEntry>,
}

impl Fib {
    pub fn new() -> Self {
        Self { trie: Trie::new() }
    }

    pub fn with_policy(policy: Box<dyn TriePolicy>) -> Self {
        Self {
            trie: Trie::with_policy(policy),
        }
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn add(
        &mut self,
        prefix: impl Into<SharedName>,
        face: FaceId,
        metric: i32,
    ) -> Result<&FibEntry, FibError> {
        self.add_observed(prefix, face, metric, &mut ())
    }

    /// Add `face` with `metric` under `prefix`, creating the entry if needed.
    pub fn add_observed(
        &mut self,
        prefix: impl Into<SharedName>,
        face: FaceId,
        metric: i32,
        observer: &mut dyn FibObserver,
    ) -> Result<&FibEntry, FibError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(FibError::EmptyPrefix);
        }

        let Inserted {
            id,
            created,
            evicted,
        } = self
            .trie
            .insert_with(&prefix, || FibEntry::new(prefix.clone()))
            .map_err(|e| {
                warn!("FIB rejected {prefix}: {e}");
                e
            })?;

        if let Some(evicted) = evicted {
            debug!("FIB evicted {} to admit {prefix}", evicted.prefix());
            observer.will_remove_fib_entry(&evicted);
        }

        let entry = self.trie.get_mut(id).ok_or(TrieError::StaleHandle(id))?;
        if created {
            debug!("New FIB entry for {prefix}");
            observer.did_add_fib_entry(entry);
        }
        entry.add_or_update_routing_metric(face, metric);
        debug!("FIB {prefix} -> {face} metric {metric}");
        Ok(&*entry)
    }

    /// Exact-match lookup.
    pub fn find(&self, prefix: &Name) -> Option<&FibEntry> {
        self.trie
            .find_exact(prefix)
            .and_then(|id| self.trie.get(id))
    }

    /// Entry of the longest registered prefix of `name`.
    pub fn longest_prefix_match(&mut self, name: &Name) -> Option<&FibEntry> {
        let id = self.trie.longest_prefix_match(name)?;
        self.trie.touch(id);
        self.trie.get(id)
    }

    /// Lookup without informing the eviction policy.
    pub fn peek_longest_prefix_match(&self, name: &Name) -> Option<&FibEntry> {
        self.trie
            .longest_prefix_match(name)
            .and_then(|id| self.trie.get(id))
    }

    pub fn remove(&mut self, prefix: &Name) -> Option<FibEntry> {
        self.remove_observed(prefix, &mut ())
    }

    pub fn remove_observed(
        &mut self,
        prefix: &Name,
        observer: &mut dyn FibObserver,
    ) -> Option<FibEntry> {
        let id = self.trie.find_exact(prefix)?;
        if let Some(entry) = self.trie.get(id) {
            observer.will_remove_fib_entry(entry);
        }
        debug!("Removing FIB entry {prefix}");
        self.trie.erase(id)
    }

    /// Remove a single next hop; the entry is erased if it was the last one.
    pub fn remove_next_hop(
        &mut self,
        prefix: &Name,
        face: FaceId,
        observer: &mut dyn FibObserver,
    ) -> bool {
        let Some(id) = self.trie.find_exact(prefix) else {
            return false;
        };
        let removed = self.trie.modify(id, |entry| entry.remove_face(face)) == Some(true);
        if removed && self.trie.get(id).is_some_and(FibEntry::is_empty) {
            if let Some(entry) = self.trie.get(id) {
                observer.will_remove_fib_entry(entry);
            }
            self.trie.erase(id);
        }
        removed
    }

    pub fn remove_face(&mut self, face: FaceId) -> usize {
        self.remove_face_observed(face, &mut ())
    }

    /// Remove `face` from every entry and erase the entries left without next
    /// hops. Returns the number of erased entries.
    pub fn remove_face_observed(&mut self, face: FaceId, observer: &mut dyn FibObserver) -> usize {
        let mut erased = 0;
        let mut cursor = self.trie.next_payload(None);
        while let Some(id) = cursor {
            let next = self.trie.next_payload(Some(id));
            let emptied = self
                .trie
                .modify(id, |entry| entry.remove_face(face) && entry.is_empty())
                .unwrap_or(false);
            if emptied {
                if let Some(entry) = self.trie.get(id) {
                    observer.will_remove_fib_entry(entry);
                }
                self.trie.erase(id);
                erased += 1;
            }
            cursor = next;
        }
        if erased > 0 {
            info!("Purged {face} from FIB, {erased} entries erased");
        }
        erased
    }

    pub fn update_status(&mut self, prefix: &Name, face: FaceId, status: NextHopStatus) -> bool {
        self.trie
            .find_exact(prefix)
            .and_then(|id| self.trie.modify(id, |entry| entry.update_status(face, status)))
            .unwrap_or(false)
    }

    /// Mark every entry stale. Nothing is removed.
    pub fn invalidate_all(&mut self) {
        let mut cursor = self.trie.next_payload(None);
        while let Some(id) = cursor {
            self.trie.modify(id, FibEntry::invalidate);
            cursor = self.trie.next_payload(Some(id));
        }
        debug!("Invalidated {} FIB entries", self.len());
    }

    /// Entries in ascending prefix order.
    pub fn iter(&self) -> impl Iterator<Item = &FibEntry> + '_ {
        self.trie.iter().map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        self.trie.clear();
    }
}

impl fmt::Display for Fib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.iter() {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::{CountingPolicy, LruPolicy};

    fn name(uri: &str) -> Name {
        Name::from_uri(uri)
    }

    #[derive(Default)]
    struct Recorder {
        added: Vec<String>,
        removed: Vec<String>,
        events: Vec<String>,
    }

    impl FibObserver for Recorder {
        fn did_add_fib_entry(&mut self, entry: &FibEntry) {
            self.added.push(entry.prefix().to_string());
            self.events.push(format!("+{}", entry.prefix()));
        }

        fn will_remove_fib_entry(&mut self, entry: &FibEntry) {
            self.removed.push(entry.prefix().to_string());
            self.events.push(format!("-{}", entry.prefix()));
        }
    }

    #[test]
    fn test_add_is_idempotent_per_face() {
        let mut fib = Fib::new();
        let mut recorder = Recorder::default();
        fib.add_observed(name("/a"), FaceId(1), 10, &mut recorder).unwrap();
        fib.add_observed(name("/a"), FaceId(1), 3, &mut recorder).unwrap();
        let entry = fib.add_observed(name("/a"), FaceId(2), 7, &mut recorder).unwrap();

        assert_eq!(entry.next_hops().len(), 2);
        assert_eq!(entry.metric(FaceId(1)), Some(3));
        assert_eq!(recorder.added, vec!["/a"]);
        assert_eq!(fib.len(), 1);
    }

    #[test]
    fn test_next_hops_ordered_by_metric_then_face() {
        let mut fib = Fib::new();
        fib.add(name("/a"), FaceId(3), 5).unwrap();
        fib.add(name("/a"), FaceId(1), 5).unwrap();
        fib.add(name("/a"), FaceId(2), -1).unwrap();

        let faces: Vec<u32> = fib
            .find(&name("/a"))
            .unwrap()
            .next_hops()
            .iter()
            .map(|hop| hop.face.id())
            .collect();
        assert_eq!(faces, vec![2, 1, 3]);
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let mut fib = Fib::new();
        assert_eq!(fib.add(Name::new(), FaceId(1), 1), Err(FibError::EmptyPrefix));
        assert!(fib.is_empty());
    }

    #[test]
    fn test_full_table_rejects() {
        let mut fib = Fib::with_policy(Box::new(CountingPolicy::new(Some(1))));
        fib.add(name("/a"), FaceId(1), 1).unwrap();
        assert_eq!(
            fib.add(name("/b"), FaceId(1), 1),
            Err(FibError::Table(TrieError::Full(1)))
        );
        // updating an existing prefix is still allowed
        assert!(fib.add(name("/a"), FaceId(2), 1).is_ok());
    }

    #[test]
    fn test_lru_eviction_notifies_observer() {
        let mut fib = Fib::with_policy(Box::new(LruPolicy::new(Some(1))));
        let mut recorder = Recorder::default();
        fib.add_observed(name("/a"), FaceId(1), 1, &mut recorder).unwrap();
        fib.add_observed(name("/b"), FaceId(2), 1, &mut recorder).unwrap();

        assert_eq!(recorder.events, vec!["+/a", "-/a", "+/b"]);
        assert!(fib.find(&name("/a")).is_none());
        assert_eq!(fib.len(), 1);
    }

    #[test]
    fn test_longest_prefix_match_prefers_most_specific() {
        let mut fib = Fib::new();
        fib.add(name("/a/b"), FaceId(1), 10).unwrap();
        assert_eq!(
            fib.longest_prefix_match(&name("/a/b/c")).unwrap().prefix().to_string(),
            "/a/b"
        );

        fib.add(name("/a/b/c"), FaceId(2), 5).unwrap();
        let entry = fib.longest_prefix_match(&name("/a/b/c")).unwrap();
        assert_eq!(entry.best().unwrap().face, FaceId(2));

        let entry = fib.longest_prefix_match(&name("/a/b/x")).unwrap();
        assert_eq!(entry.best().unwrap().face, FaceId(1));
        assert!(fib.longest_prefix_match(&name("/z")).is_none());
        assert!(fib.find(&name("/a")).is_none());
    }

    #[test]
    fn test_remove_notifies_before_erase() {
        let mut fib = Fib::new();
        let mut recorder = Recorder::default();
        fib.add(name("/a/b"), FaceId(1), 1).unwrap();

        let removed = fib.remove_observed(&name("/a/b"), &mut recorder).unwrap();
        assert_eq!(removed.prefix().to_string(), "/a/b");
        assert_eq!(recorder.removed, vec!["/a/b"]);
        assert!(fib.remove(&name("/a/b")).is_none());
        assert!(fib.is_empty());
    }

    #[test]
    fn test_remove_face_erases_emptied_entries() {
        let mut fib = Fib::new();
        let mut recorder = Recorder::default();
        fib.add(name("/a"), FaceId(1), 1).unwrap();
        fib.add(name("/a/b"), FaceId(1), 1).unwrap();
        fib.add(name("/a/b"), FaceId(2), 2).unwrap();
        fib.add(name("/a/b/c"), FaceId(1), 1).unwrap();
        fib.add(name("/d"), FaceId(1), 1).unwrap();
        fib.add(name("/e"), FaceId(2), 1).unwrap();
        let before = fib.len();

        let erased = fib.remove_face_observed(FaceId(1), &mut recorder);

        assert_eq!(erased, 3);
        assert_eq!(recorder.removed, vec!["/a", "/a/b/c", "/d"]);
        assert!(fib.iter().all(|entry| !entry.contains(FaceId(1))));
        assert!(fib.len() <= before);
        let remaining: Vec<String> = fib.iter().map(|e| e.prefix().to_string()).collect();
        assert_eq!(remaining, vec!["/a/b", "/e"]);
    }

    #[test]
    fn test_remove_next_hop() {
        let mut fib = Fib::new();
        fib.add(name("/a"), FaceId(1), 1).unwrap();
        fib.add(name("/a"), FaceId(2), 1).unwrap();

        assert!(fib.remove_next_hop(&name("/a"), FaceId(1), &mut ()));
        assert!(fib.find(&name("/a")).is_some());
        assert!(!fib.remove_next_hop(&name("/a"), FaceId(1), &mut ()));
        assert!(fib.remove_next_hop(&name("/a"), FaceId(2), &mut ()));
        assert!(fib.find(&name("/a")).is_none());
    }

    #[test]
    fn test_invalidate_all_keeps_entries() {
        let mut fib = Fib::new();
        fib.add(name("/a"), FaceId(1), 1).unwrap();
        fib.add(name("/b"), FaceId(2), 1).unwrap();

        fib.invalidate_all();

        assert_eq!(fib.len(), 2);
        assert!(fib.iter().all(|entry| !entry.is_valid()));
        assert!(fib.longest_prefix_match(&name("/a/x")).unwrap().best().is_none());

        // a fresh metric update revives the hop
        fib.add(name("/a"), FaceId(1), 4).unwrap();
        assert!(fib.find(&name("/a")).unwrap().is_valid());
    }

    #[test]
    fn test_update_status_changes_best_hop() {
        let mut fib = Fib::new();
        fib.add(name("/a"), FaceId(1), 1).unwrap();
        fib.add(name("/a"), FaceId(2), 2).unwrap();

        assert!(fib.update_status(&name("/a"), FaceId(1), NextHopStatus::Red));
        assert_eq!(fib.find(&name("/a")).unwrap().best().unwrap().face, FaceId(2));
        assert!(!fib.update_status(&name("/a"), FaceId(9), NextHopStatus::Red));
    }

    #[test]
    fn test_display_dump() {
        let mut fib = Fib::new();
        fib.add(name("/a"), FaceId(1), 10).unwrap();
        assert_eq!(fib.to_string(), "/a\tface=1(metric 10, Green)\n");
    }
}
