//! Name-pair lease table.
//!
//! Tracks `old name -> new name` bindings left behind by a rename. Every entry
//! is reachable through three indices kept in lockstep: by old name, by new
//! name and by lease expiry. Lease times are offsets from simulation start
//! supplied by the caller; the table has no clock of its own.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use log::{debug, info};

use crate::name::{Name, SharedName};

/// Default distance between the renewal point and the lease expiry.
pub const DEFAULT_RENEW_GUARD: Duration = Duration::from_secs(1);

/// One `old name -> new name` binding.
///
/// `renew_at` is strictly before `lease_expiry` for every entry with a
/// non-zero expiry. A zero expiry has no earlier instant, so its renewal point
/// is zero as well; [`Nnpt`] refuses such entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEntry {
    old_name: SharedName,
    new_name: SharedName,
    lease_expiry: Duration,
    renew_at: Duration,
}

impl LeaseEntry {
    /// Entry renewing [`DEFAULT_RENEW_GUARD`] before it expires.
    pub fn new(old_name: SharedName, new_name: SharedName, lease_expiry: Duration) -> Self {
        Self::with_guard(old_name, new_name, lease_expiry, None, DEFAULT_RENEW_GUARD)
    }

    /// Entry with an explicit renewal point. A `renew_at` at or after the
    /// expiry is pulled back to [`DEFAULT_RENEW_GUARD`] before it.
    pub fn with_renew(
        old_name: SharedName,
        new_name: SharedName,
        lease_expiry: Duration,
        renew_at: Duration,
    ) -> Self {
        Self::with_guard(
            old_name,
            new_name,
            lease_expiry,
            Some(renew_at),
            DEFAULT_RENEW_GUARD,
        )
    }

    fn with_guard(
        old_name: SharedName,
        new_name: SharedName,
        lease_expiry: Duration,
        renew_at: Option<Duration>,
        guard: Duration,
    ) -> Self {
        let renew_at = match renew_at {
            Some(renew_at) if renew_at < lease_expiry => renew_at,
            _ => lease_expiry.saturating_sub(guard.max(Duration::from_nanos(1))),
        };
        Self {
            old_name,
            new_name,
            lease_expiry,
            renew_at,
        }
    }

    pub fn old_name(&self) -> &SharedName {
        &self.old_name
    }

    pub fn new_name(&self) -> &SharedName {
        &self.new_name
    }

    pub fn lease_expiry(&self) -> Duration {
        self.lease_expiry
    }

    pub fn renew_at(&self) -> Duration {
        self.renew_at
    }

    pub fn is_expired(&self, now: Duration) -> bool {
        self.lease_expiry <= now
    }

    /// Past the renewal point but not yet expired.
    pub fn needs_renewal(&self, now: Duration) -> bool {
        self.renew_at <= now && !self.is_expired(now)
    }

    fn lease_key(&self) -> (Duration, SharedName) {
        (self.lease_expiry, self.old_name.clone())
    }
}

impl fmt::Display for LeaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} lease={:?} renew={:?}",
            self.old_name, self.new_name, self.lease_expiry, self.renew_at
        )
    }
}

/// Receives lease table lifecycle notifications.
pub trait LeaseObserver {
    fn did_add_lease_entry(&mut self, _entry: &LeaseEntry) {}

    fn will_remove_lease_entry(&mut self, _entry: &LeaseEntry) {}
}

impl LeaseObserver for () {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("Old name {0} is already bound")]
    OldNameBound(Name),
    #[error("New name {0} is already bound")]
    NewNameBound(Name),
    #[error("No lease for {0}")]
    NotFound(Name),
    #[error("Lease for {0} expires at time zero")]
    ZeroLease(Name),
}

#[derive(Debug)]
pub struct Nnpt {
    by_old: BTreeMap<SharedName, LeaseEntry>,
    by_new: BTreeMap<SharedName, SharedName>,
    // ties on expiry are broken by old name, which is unique
    by_lease: BTreeSet<(Duration, SharedName)>,
    renew_guard: Duration,
}

impl Default for Nnpt {
    fn default() -> Self {
        Self::new()
    }
}

impl Nnpt {
    pub fn new() -> Self {
        Self::with_renew_guard(DEFAULT_RENEW_GUARD)
    }

    pub fn with_renew_guard(renew_guard: Duration) -> Self {
        Self {
            by_old: BTreeMap::new(),
            by_new: BTreeMap::new(),
            by_lease: BTreeSet::new(),
            renew_guard,
        }
    }

    pub fn len(&self) -> usize {
        self.by_old.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_old.is_empty()
    }

    pub fn add_entry(
        &mut self,
        old_name: impl Into<SharedName>,
        new_name: impl Into<SharedName>,
        lease_expiry: Duration,
    ) -> Result<&LeaseEntry, LeaseError> {
        self.add_observed(old_name, new_name, lease_expiry, None, &mut ())
    }

    pub fn add_entry_with_renew(
        &mut self,
        old_name: impl Into<SharedName>,
        new_name: impl Into<SharedName>,
        lease_expiry: Duration,
        renew_at: Duration,
    ) -> Result<&LeaseEntry, LeaseError> {
        self.add_observed(old_name, new_name, lease_expiry, Some(renew_at), &mut ())
    }

    /// Build an entry with this table's renewal guard and insert it.
    pub fn add_observed(
        &mut self,
        old_name: impl Into<SharedName>,
        new_name: impl Into<SharedName>,
        lease_expiry: Duration,
        renew_at: Option<Duration>,
        observer: &mut dyn LeaseObserver,
    ) -> Result<&LeaseEntry, LeaseError> {
        let entry = LeaseEntry::with_guard(
            old_name.into(),
            new_name.into(),
            lease_expiry,
            renew_at,
            self.renew_guard,
        );
        self.insert(entry, observer)
    }

    /// Insert `entry` into all three indices. Rejected if either name is
    /// already bound or the lease expires at time zero.
    pub fn insert(
        &mut self,
        entry: LeaseEntry,
        observer: &mut dyn LeaseObserver,
    ) -> Result<&LeaseEntry, LeaseError> {
        if entry.lease_expiry.is_zero() {
            return Err(LeaseError::ZeroLease((*entry.old_name).clone()));
        }
        if self.by_old.contains_key(entry.old_name.as_ref()) {
            return Err(LeaseError::OldNameBound((*entry.old_name).clone()));
        }
        if self.by_new.contains_key(entry.new_name.as_ref()) {
            return Err(LeaseError::NewNameBound((*entry.new_name).clone()));
        }

        debug!("NNPT add {entry}");
        let old_name = entry.old_name.clone();
        self.by_new
            .insert(entry.new_name.clone(), entry.old_name.clone());
        self.by_lease.insert(entry.lease_key());
        let entry = self.by_old.entry(old_name).or_insert(entry);
        observer.did_add_lease_entry(entry);
        Ok(&*entry)
    }

    pub fn delete_entry(&mut self, old_name: &Name) -> Option<LeaseEntry> {
        self.remove_observed(old_name, &mut ())
    }

    /// Delete the binding only if `old_name` is paired with `new_name`.
    pub fn delete_pair(&mut self, old_name: &Name, new_name: &Name) -> Option<LeaseEntry> {
        let paired = self
            .by_old
            .get(old_name)
            .is_some_and(|entry| entry.new_name.as_ref() == new_name);
        if paired {
            self.delete_entry(old_name)
        } else {
            None
        }
    }

    pub fn delete(&mut self, entry: &LeaseEntry) -> Option<LeaseEntry> {
        self.delete_pair(&entry.old_name, &entry.new_name)
    }

    /// Remove the entry for `old_name` from every index.
    pub fn remove_observed(
        &mut self,
        old_name: &Name,
        observer: &mut dyn LeaseObserver,
    ) -> Option<LeaseEntry> {
        if let Some(entry) = self.by_old.get(old_name) {
            observer.will_remove_lease_entry(entry);
        }
        let entry = self.by_old.remove(old_name)?;
        self.by_new.remove(entry.new_name.as_ref());
        self.by_lease.remove(&entry.lease_key());
        debug!("NNPT delete {entry}");
        Some(entry)
    }

    pub fn found_old_name(&self, name: &Name) -> bool {
        self.by_old.contains_key(name)
    }

    pub fn found_new_name(&self, name: &Name) -> bool {
        self.by_new.contains_key(name)
    }

    /// Entry whose old name is `name`, or failing that, whose new name is.
    pub fn find_entry(&self, name: &Name) -> Option<&LeaseEntry> {
        self.by_old
            .get(name)
            .or_else(|| self.find_entry_by_new(name))
    }

    pub fn find_entry_by_new(&self, new_name: &Name) -> Option<&LeaseEntry> {
        self.by_new
            .get(new_name)
            .and_then(|old| self.by_old.get(old.as_ref()))
    }

    pub fn find_paired_name(&self, old_name: &Name) -> Result<SharedName, LeaseError> {
        self.find_paired_name_ptr(old_name)
            .cloned()
            .ok_or_else(|| LeaseError::NotFound(old_name.clone()))
    }

    pub fn find_paired_old_name(&self, new_name: &Name) -> Result<SharedName, LeaseError> {
        self.find_paired_old_name_ptr(new_name)
            .cloned()
            .ok_or_else(|| LeaseError::NotFound(new_name.clone()))
    }

    pub fn find_paired_name_ptr(&self, old_name: &Name) -> Option<&SharedName> {
        self.by_old.get(old_name).map(|entry| &entry.new_name)
    }

    pub fn find_paired_old_name_ptr(&self, new_name: &Name) -> Option<&SharedName> {
        self.by_new.get(new_name)
    }

    /// Follow renames starting at `name` and return the last name in the
    /// chain, or `name` itself if it is not bound. Each lease is followed at
    /// most once, so a cycle ends the walk.
    pub fn resolve(&self, name: &SharedName) -> SharedName {
        let mut current = name.clone();
        for _ in 0..self.len() {
            match self.find_paired_name_ptr(&current) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        current
    }

    pub fn find_name_expire_time(&self, old_name: &Name) -> Option<Duration> {
        self.by_old.get(old_name).map(LeaseEntry::lease_expiry)
    }

    /// Replace the entry for `old_name` with one expiring at `lease_expiry`.
    ///
    /// The entry is taken out of every index and reinserted, since the expiry
    /// is an index key.
    pub fn update_lease_time(
        &mut self,
        old_name: &Name,
        lease_expiry: Duration,
        renew_at: Option<Duration>,
    ) -> Result<&LeaseEntry, LeaseError> {
        if lease_expiry.is_zero() {
            return Err(LeaseError::ZeroLease(old_name.clone()));
        }
        let current = self
            .by_old
            .remove(old_name)
            .ok_or_else(|| LeaseError::NotFound(old_name.clone()))?;
        self.by_lease.remove(&current.lease_key());

        let updated = LeaseEntry::with_guard(
            current.old_name,
            current.new_name,
            lease_expiry,
            renew_at,
            self.renew_guard,
        );
        debug!("NNPT update {updated}");
        self.by_lease.insert(updated.lease_key());
        let entry = self.by_old.entry(updated.old_name.clone()).or_insert(updated);
        Ok(&*entry)
    }

    /// Remove every entry whose lease expired at or before `now`. Returns the
    /// removed entries in expiry order.
    pub fn clean_expired(
        &mut self,
        now: Duration,
        observer: &mut dyn LeaseObserver,
    ) -> Vec<LeaseEntry> {
        let mut removed = Vec::new();
        while let Some((expiry, old_name)) = self.by_lease.first().cloned() {
            if expiry > now {
                break;
            }
            match self.remove_observed(&old_name, observer) {
                Some(entry) => removed.push(entry),
                // keep the sweep moving even if the indices disagree
                None => {
                    self.by_lease.remove(&(expiry, old_name));
                }
            }
        }
        if !removed.is_empty() {
            info!("NNPT expired {} entries at {now:?}", removed.len());
        }
        removed
    }

    /// Entries whose renewal point has passed but which are still live.
    pub fn due_for_renewal(&self, now: Duration) -> impl Iterator<Item = &LeaseEntry> + '_ {
        self.iter_by_lease()
            .filter(move |entry| entry.needs_renewal(now))
    }

    /// Entries in old-name order.
    pub fn iter(&self) -> impl Iterator<Item = &LeaseEntry> + '_ {
        self.by_old.values()
    }

    /// Entries in expiry order.
    pub fn iter_by_lease(&self) -> impl Iterator<Item = &LeaseEntry> + '_ {
        self.by_lease
            .iter()
            .filter_map(|(_, old)| self.by_old.get(old.as_ref()))
    }

    pub fn print_by_address(&self) -> String {
        self.iter().map(|entry| format!("{entry}\n")).collect()
    }

    pub fn print_by_lease(&self) -> String {
        self.iter_by_lease()
            .map(|entry| format!("{entry}\n"))
            .collect()
    }

    pub fn clear(&mut self) {
        self.by_old.clear();
        self.by_new.clear();
        self.by_lease.clear();
    }
}

impl fmt::Display for Nnpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print_by_address())
    }
}
