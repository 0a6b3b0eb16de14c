//! Per-destination buffer for PDUs waiting on name resolution.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use log::{debug, trace};

use crate::name::{Name, SharedName};
use crate::pdu::{DataObject, DataUnit, Pdu, PduKind, Solicitation};
use crate::trie::{Inserted, Trie, TrieError, TriePolicy};

pub const DEFAULT_RETRANSMISSION: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_QUEUE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("No buffer for destination {0}")]
    NoDestination(Name),
    #[error("Queue for {0} is full ({1} units)")]
    QueueFull(Name, usize),
    #[error("{0} PDUs are not buffered")]
    NotBufferable(PduKind),
    #[error(transparent)]
    Table(#[from] TrieError),
}

/// FIFO of encoded PDUs for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduQueue {
    destination: SharedName,
    units: VecDeque<Vec<u8>>,
    max_len: usize,
}

impl PduQueue {
    pub fn new(destination: SharedName, max_len: usize) -> Self {
        Self {
            destination,
            units: VecDeque::new(),
            max_len,
        }
    }

    pub fn destination(&self) -> &SharedName {
        &self.destination
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.units.len() >= self.max_len
    }

    fn push(&mut self, unit: Vec<u8>) -> Result<(), BufferError> {
        if self.is_full() {
            return Err(BufferError::QueueFull(
                (*self.destination).clone(),
                self.max_len,
            ));
        }
        self.units.push_back(unit);
        Ok(())
    }

    fn drain(&mut self) -> Vec<Vec<u8>> {
        self.units.drain(..).collect()
    }

    /// Encoded units in push order.
    pub fn into_units(self) -> Vec<Vec<u8>> {
        self.units.into()
    }
}

#[derive(Debug)]
pub struct PduBuffer {
    trie: Trie<PduQueue>,
    retransmission: Duration,
    max_queue_len: usize,
}

impl Default for PduBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETRANSMISSION)
    }
}

impl PduBuffer {
    pub fn new(retransmission: Duration) -> Self {
        Self {
            trie: Trie::new(),
            retransmission,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
        }
    }

    pub fn with_limits(
        retransmission: Duration,
        max_queue_len: usize,
        policy: Box<dyn TriePolicy>,
    ) -> Self {
        Self {
            trie: Trie::with_policy(policy),
            retransmission,
            max_queue_len,
        }
    }

    /// Create an empty queue for `name`. Adding an existing destination is a no-op.
    ///
    /// Returns the queue the table policy evicted to make room, if any.
    pub fn add_destination(
        &mut self,
        name: impl Into<SharedName>,
    ) -> Result<Option<PduQueue>, BufferError> {
        let name = name.into();
        let max_len = self.max_queue_len;
        let Inserted {
            created, evicted, ..
        } = self
            .trie
            .insert_with(&name, || PduQueue::new(name.clone(), max_len))?;
        if created {
            debug!("Buffering for destination {name}");
        }
        if let Some(queue) = &evicted {
            debug!(
                "Evicted buffer for {} with {} units",
                queue.destination,
                queue.len()
            );
        }
        Ok(evicted)
    }

    /// Drop the queue for `name` together with every unit in it.
    pub fn remove_destination(&mut self, name: &Name) -> Option<PduQueue> {
        let id = self.trie.find_exact(name)?;
        let queue = self.trie.erase(id);
        if let Some(queue) = &queue {
            debug!("Dropped buffer for {name} with {} units", queue.len());
        }
        queue
    }

    pub fn destination_exists(&self, name: &Name) -> bool {
        self.trie.find_exact(name).is_some()
    }

    pub fn push_solicitation(&mut self, name: &Name, pdu: &Solicitation) -> Result<(), BufferError> {
        self.push_encoded(name, Pdu::So(pdu.clone()).encode())
    }

    pub fn push_data_object(&mut self, name: &Name, pdu: &DataObject) -> Result<(), BufferError> {
        self.push_encoded(name, Pdu::Do(pdu.clone()).encode())
    }

    pub fn push_data_unit(&mut self, name: &Name, pdu: &DataUnit) -> Result<(), BufferError> {
        self.push_encoded(name, Pdu::Du(pdu.clone()).encode())
    }

    /// Push any bufferable PDU. Only SO, DO and DU are accepted.
    pub fn push(&mut self, name: &Name, pdu: &Pdu) -> Result<(), BufferError> {
        if !self.destination_exists(name) {
            return Err(BufferError::NoDestination(name.clone()));
        }
        match pdu {
            Pdu::So(so) => self.push_solicitation(name, so),
            Pdu::Do(data) => self.push_data_object(name, data),
            Pdu::Du(du) => self.push_data_unit(name, du),
            other => Err(BufferError::NotBufferable(other.kind())),
        }
    }

    fn push_encoded(&mut self, name: &Name, unit: Vec<u8>) -> Result<(), BufferError> {
        let id = self
            .trie
            .find_exact(name)
            .ok_or_else(|| BufferError::NoDestination(name.clone()))?;
        let len = unit.len();
        self.trie
            .modify(id, |queue| queue.push(unit))
            .ok_or_else(|| BufferError::NoDestination(name.clone()))??;
        trace!("Buffered {len} bytes for {name}");
        Ok(())
    }

    /// Detach every unit queued for `name` in push order. The destination
    /// stays registered with an empty queue.
    pub fn pop_queue(&mut self, name: &Name) -> Result<Vec<Vec<u8>>, BufferError> {
        self.trie
            .find_exact(name)
            .and_then(|id| self.trie.modify(id, PduQueue::drain))
            .ok_or_else(|| BufferError::NoDestination(name.clone()))
    }

    /// Number of units waiting for `name`; zero if it has no queue.
    pub fn queue_size(&self, name: &Name) -> usize {
        self.trie
            .find_exact(name)
            .and_then(|id| self.trie.get(id))
            .map_or(0, PduQueue::len)
    }

    pub fn retransmission(&self) -> Duration {
        self.retransmission
    }

    pub fn set_retransmission(&mut self, retransmission: Duration) {
        self.retransmission = retransmission;
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Queues in ascending destination order.
    pub fn queues(&self) -> impl Iterator<Item = &PduQueue> + '_ {
        self.trie.iter().map(|(_, queue)| queue)
    }

    /// Destinations that have units waiting, in ascending order.
    pub fn pending(&self) -> Vec<SharedName> {
        self.queues()
            .filter(|queue| !queue.is_empty())
            .map(|queue| queue.destination.clone())
            .collect()
    }

    /// Destinations under `prefix` that have units waiting.
    pub fn pending_under(&self, prefix: &Name) -> Vec<SharedName> {
        self.queues()
            .filter(|queue| !queue.is_empty() && prefix.is_prefix_of(&queue.destination))
            .map(|queue| queue.destination.clone())
            .collect()
    }
}

impl fmt::Display for PduBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for queue in self.queues() {
            writeln!(f, "{}\t{} pending", queue.destination, queue.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::{CountingPolicy, LruPolicy};

    fn name(uri: &str) -> SharedName {
        Name::from_uri(uri).into_shared()
    }

    #[test]
    fn test_push_requires_destination() {
        let mut buffer = PduBuffer::default();
        let dst = name("/n1");
        let data = DataObject::new(dst.clone(), b"x".to_vec());

        assert_eq!(
            buffer.push_data_object(&dst, &data),
            Err(BufferError::NoDestination((*dst).clone()))
        );
        assert!(!buffer.destination_exists(&dst));
        assert_eq!(buffer.queue_size(&dst), 0);
    }

    #[test]
    fn test_fifo_and_pop_leaves_empty_queue() {
        let mut buffer = PduBuffer::default();
        let dst = name("/n1");
        buffer.add_destination(dst.clone()).unwrap();
        assert_eq!(buffer.queue_size(&dst), 0);

        let so = Solicitation::new(name("/src"), vec![1]);
        let data = DataObject::new(dst.clone(), vec![2]);
        let du = DataUnit::new(name("/src"), dst.clone(), vec![3]);
        buffer.push_solicitation(&dst, &so).unwrap();
        buffer.push_data_object(&dst, &data).unwrap();
        buffer.push_data_unit(&dst, &du).unwrap();
        assert_eq!(buffer.queue_size(&dst), 3);

        let units = buffer.pop_queue(&dst).unwrap();
        let decoded: Vec<Pdu> = units.iter().map(|u| Pdu::decode(u).unwrap()).collect();
        assert_eq!(decoded, vec![Pdu::So(so), Pdu::Do(data), Pdu::Du(du)]);
        assert_eq!(buffer.queue_size(&dst), 0);
        assert!(buffer.destination_exists(&dst));
    }

    #[test]
    fn test_add_destination_is_idempotent() {
        let mut buffer = PduBuffer::default();
        let dst = name("/a/b");
        buffer.add_destination(dst.clone()).unwrap();
        buffer
            .push_data_object(&dst, &DataObject::new(dst.clone(), vec![]))
            .unwrap();
        buffer.add_destination(dst.clone()).unwrap();

        assert_eq!(buffer.queue_size(&dst), 1);
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.destination_exists(&name("/a")));
    }

    #[test]
    fn test_remove_destination_drops_units() {
        let mut buffer = PduBuffer::default();
        let dst = name("/n1");
        buffer.add_destination(dst.clone()).unwrap();
        buffer
            .push_data_object(&dst, &DataObject::new(dst.clone(), vec![]))
            .unwrap();

        let queue = buffer.remove_destination(&dst).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(!buffer.destination_exists(&dst));
        assert_eq!(
            buffer.pop_queue(&dst),
            Err(BufferError::NoDestination((*dst).clone()))
        );
    }

    #[test]
    fn test_queue_bound() {
        let mut buffer =
            PduBuffer::with_limits(DEFAULT_RETRANSMISSION, 2, Box::new(CountingPolicy::unbounded()));
        let dst = name("/n1");
        let data = DataObject::new(dst.clone(), vec![]);
        buffer.add_destination(dst.clone()).unwrap();
        buffer.push_data_object(&dst, &data).unwrap();
        buffer.push_data_object(&dst, &data).unwrap();

        assert_eq!(
            buffer.push_data_object(&dst, &data),
            Err(BufferError::QueueFull((*dst).clone(), 2))
        );
        assert_eq!(buffer.queue_size(&dst), 2);
    }

    #[test]
    fn test_destination_limit() {
        let mut buffer =
            PduBuffer::with_limits(DEFAULT_RETRANSMISSION, 8, Box::new(CountingPolicy::new(Some(1))));
        buffer.add_destination(name("/a")).unwrap();
        assert_eq!(
            buffer.add_destination(name("/b")),
            Err(BufferError::Table(TrieError::Full(1)))
        );
    }

    #[test]
    fn test_lru_destination_eviction_returns_queue() {
        let mut buffer =
            PduBuffer::with_limits(DEFAULT_RETRANSMISSION, 8, Box::new(LruPolicy::new(Some(1))));
        let a = name("/a");
        assert!(buffer.add_destination(a.clone()).unwrap().is_none());
        buffer
            .push_data_object(&a, &DataObject::new(a.clone(), vec![7]))
            .unwrap();

        let evicted = buffer.add_destination(name("/b")).unwrap().unwrap();
        assert_eq!(evicted.destination(), &a);
        assert_eq!(evicted.len(), 1);
        assert!(!buffer.destination_exists(&a));
        assert!(buffer.add_destination(name("/b")).unwrap().is_none());
    }

    #[test]
    fn test_non_bufferable_kinds_are_rejected() {
        let mut buffer = PduBuffer::default();
        let dst = name("/n1");
        let null = Pdu::Null(Default::default());
        assert_eq!(
            buffer.push(&dst, &null),
            Err(BufferError::NoDestination((*dst).clone()))
        );

        buffer.add_destination(dst.clone()).unwrap();
        assert_eq!(
            buffer.push(&dst, &null),
            Err(BufferError::NotBufferable(PduKind::Null))
        );
        assert_eq!(buffer.queue_size(&dst), 0);
    }

    #[test]
    fn test_pending_under_prefix() {
        let mut buffer = PduBuffer::default();
        for uri in ["/a/b", "/a/c", "/d"] {
            let dst = name(uri);
            buffer.add_destination(dst.clone()).unwrap();
            buffer
                .push_data_object(&dst, &DataObject::new(dst.clone(), vec![]))
                .unwrap();
        }
        buffer.add_destination(name("/a/e")).unwrap();

        let all: Vec<String> = buffer.pending().iter().map(|n| n.to_string()).collect();
        assert_eq!(all, vec!["/a/b", "/a/c", "/d"]);

        let pending: Vec<String> = buffer
            .pending_under(&Name::from_uri("/a"))
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(pending, vec!["/a/b", "/a/c"]);
    }

    #[test]
    fn test_retransmission_interval() {
        let mut buffer = PduBuffer::default();
        assert_eq!(buffer.retransmission(), Duration::from_secs(1));
        buffer.set_retransmission(Duration::from_millis(250));
        assert_eq!(buffer.retransmission(), Duration::from_millis(250));
    }
}
