//! Union and intersection over sorted entity id streams.
//!
//! A k-way merge keeps one cached head per source. Every source is closed
//! exactly once: on exhaustion of the merged stream, on an explicit `close`,
//! or on drop. The first close failure is reported; later sources are still
//! closed.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::range::ScanOrder;
use crate::EntityId;

/// Sorted, duplicate-free stream of entity ids owning closable resources.
pub trait IdStream {
    fn next_id(&mut self) -> Result<Option<EntityId>>;

    /// Release resources. Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    Union,
    Intersection,
}

struct Source<S> {
    stream: S,
    head: Option<EntityId>,
    exhausted: bool,
}

pub struct CompositeIterator<S: IdStream> {
    sources: Vec<Source<S>>,
    mode: CompositeMode,
    order: ScanOrder,
    primed: bool,
    done: bool,
    closed: bool,
}

impl<S: IdStream> CompositeIterator<S> {
    pub fn new(streams: Vec<S>, mode: CompositeMode, order: ScanOrder) -> Self {
        let sources = streams
            .into_iter()
            .map(|stream| Source {
                stream,
                head: None,
                exhausted: false,
            })
            .collect();
        Self {
            sources,
            mode,
            order,
            primed: false,
            done: false,
            closed: false,
        }
    }

    pub fn union(streams: Vec<S>, order: ScanOrder) -> Self {
        Self::new(streams, CompositeMode::Union, order)
    }

    pub fn intersection(streams: Vec<S>, order: ScanOrder) -> Self {
        Self::new(streams, CompositeMode::Intersection, order)
    }

    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    pub fn order(&self) -> ScanOrder {
        self.order
    }

    /// Close every source. Idempotent; returns the first failure.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.done = true;
        let mut first_err = None;
        for source in &mut self.sources {
            if let Err(err) = source.stream.close() {
                tracing::warn!(error = %err, "failed to close composite source");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn advance(source: &mut Source<S>) -> Result<()> {
        source.head = source.stream.next_id()?;
        source.exhausted = source.head.is_none();
        Ok(())
    }

    fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;
        for source in &mut self.sources {
            Self::advance(source)?;
        }
        Ok(())
    }

    /// Head that comes first in iteration order among live sources.
    fn leading_head(&self) -> Option<EntityId> {
        let order = self.order;
        self.sources
            .iter()
            .filter_map(|s| s.head)
            .reduce(|best, id| if order.precedes(id, best) { id } else { best })
    }

    fn step(&mut self) -> Result<Option<EntityId>> {
        self.prime()?;
        loop {
            if self.mode == CompositeMode::Intersection
                && (self.sources.is_empty() || self.sources.iter().any(|s| s.exhausted))
            {
                return Ok(None);
            }
            let Some(lead) = self.leading_head() else {
                return Ok(None);
            };
            let all_match = self.sources.iter().all(|s| s.head == Some(lead));
            for source in &mut self.sources {
                if source.head == Some(lead) {
                    Self::advance(source)?;
                }
            }
            match self.mode {
                CompositeMode::Union => return Ok(Some(lead)),
                CompositeMode::Intersection if all_match => return Ok(Some(lead)),
                CompositeMode::Intersection => continue,
            }
        }
    }

    /// Next merged id, or `None` once the merged stream ends. Sources are
    /// closed as soon as it ends.
    pub fn next_id(&mut self) -> Result<Option<EntityId>> {
        if self.done {
            return Ok(None);
        }
        match self.step() {
            Ok(Some(id)) => Ok(Some(id)),
            Ok(None) => {
                self.close()?;
                Ok(None)
            }
            Err(err) => {
                let _ = self.close();
                Err(err)
            }
        }
    }
}

impl<S: IdStream> IdStream for CompositeIterator<S> {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        CompositeIterator::next_id(self)
    }

    fn close(&mut self) -> Result<()> {
        CompositeIterator::close(self)
    }
}

impl<S: IdStream> Iterator for CompositeIterator<S> {
    type Item = Result<EntityId>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_id().transpose()
    }
}

impl<S: IdStream> Drop for CompositeIterator<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Id stream over an in-memory sorted list.
#[derive(Debug, Clone, Default)]
pub struct SortedIds {
    ids: std::vec::IntoIter<EntityId>,
    closed: bool,
}

impl SortedIds {
    /// `ids` must already be sorted in the order the consumer expects.
    pub fn new(ids: Vec<EntityId>) -> Self {
        Self {
            ids: ids.into_iter(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl IdStream for SortedIds {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.ids.next())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::TokenScanError;

    struct Counted {
        inner: SortedIds,
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    impl IdStream for Counted {
        fn next_id(&mut self) -> Result<Option<EntityId>> {
            self.inner.next_id()
        }

        fn close(&mut self) -> Result<()> {
            if self.inner.is_closed() {
                return Ok(());
            }
            self.inner.close()?;
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(TokenScanError::Map("close failed".to_string()));
            }
            Ok(())
        }
    }

    fn counted(ids: &[EntityId], closes: &Arc<AtomicUsize>) -> Counted {
        Counted {
            inner: SortedIds::new(ids.to_vec()),
            closes: Arc::clone(closes),
            fail_close: false,
        }
    }

    fn collect<S: IdStream>(iter: CompositeIterator<S>) -> Vec<EntityId> {
        iter.map(|id| id.unwrap()).collect()
    }

    #[test]
    fn union_ascending() {
        let streams = vec![
            SortedIds::new(vec![1, 4, 6]),
            SortedIds::new(vec![2, 4, 9]),
            SortedIds::new(vec![]),
        ];
        assert_eq!(
            collect(CompositeIterator::union(streams, ScanOrder::Ascending)),
            vec![1, 2, 4, 6, 9]
        );
    }

    #[test]
    fn intersection_ascending() {
        let streams = vec![
            SortedIds::new(vec![1, 3, 5, 7, 9]),
            SortedIds::new(vec![3, 4, 5, 9]),
            SortedIds::new(vec![0, 3, 9, 10]),
        ];
        assert_eq!(
            collect(CompositeIterator::intersection(streams, ScanOrder::Ascending)),
            vec![3, 9]
        );
    }

    #[test]
    fn descending_merges_by_maximum() {
        let union = vec![SortedIds::new(vec![9, 4, 1]), SortedIds::new(vec![8, 4, 2])];
        assert_eq!(
            collect(CompositeIterator::union(union, ScanOrder::Descending)),
            vec![9, 8, 4, 2, 1]
        );
        let inter = vec![SortedIds::new(vec![9, 4, 1]), SortedIds::new(vec![8, 4, 1])];
        assert_eq!(
            collect(CompositeIterator::intersection(inter, ScanOrder::Descending)),
            vec![4, 1]
        );
    }

    #[test]
    fn zero_sources_yield_nothing() {
        let empty: Vec<SortedIds> = Vec::new();
        assert!(collect(CompositeIterator::union(empty.clone(), ScanOrder::Ascending)).is_empty());
        assert!(collect(CompositeIterator::intersection(empty, ScanOrder::Ascending)).is_empty());
    }

    #[test]
    fn empty_source_empties_intersection_but_closes_everything() {
        let closes = Arc::new(AtomicUsize::new(0));
        let streams = vec![
            counted(&[1, 2, 3], &closes),
            counted(&[], &closes),
            counted(&[2, 3], &closes),
        ];
        let mut iter = CompositeIterator::intersection(streams, ScanOrder::Ascending);
        assert_eq!(iter.next_id().unwrap(), None);
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        drop(iter);
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn early_close_closes_each_source_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let streams = vec![counted(&[1, 2, 3], &closes), counted(&[2, 5], &closes)];
        let mut iter = CompositeIterator::union(streams, ScanOrder::Ascending);
        assert_eq!(iter.next_id().unwrap(), Some(1));
        iter.close().unwrap();
        iter.close().unwrap();
        assert_eq!(iter.next_id().unwrap(), None);
        drop(iter);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn close_failure_is_reported_after_closing_all() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut failing = counted(&[1], &closes);
        failing.fail_close = true;
        let streams = vec![failing, counted(&[1], &closes), counted(&[2], &closes)];
        let mut iter = CompositeIterator::union(streams, ScanOrder::Ascending);
        assert!(iter.close().is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }
}
