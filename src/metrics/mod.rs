use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use smallvec::SmallVec;

use crate::{
    collector::Collector,
    desc::{Desc, Labels},
    error::{Error, Result},
    metric::Metric,
    utils::LabelHasher,
};

pub(crate) mod counter;
pub(crate) mod gauge;
pub(crate) mod histogram;
pub(crate) mod meter;
pub(crate) mod sample;
pub(crate) mod timer;

/// The per-label-combination instance that a [`MetricVec`] fans out into.
/// Implemented by the scalar metric types so a vec child is exactly the type a
/// caller would have declared without labels.
pub trait VecChild: Clone + Send + Sync + 'static {
    /// Construction options inherited by every child of one vec.
    type Opts: Send + Sync + 'static;

    fn new_child(desc: Arc<Desc>, labels: Labels, interval: Duration, opts: &Self::Opts) -> Self;

    /// Emit this child's snapshot(s).
    fn emit(&self, sink: &mut dyn FnMut(Metric));
}

struct VecInner<C: VecChild> {
    desc: Arc<Desc>,
    interval: Duration,
    opts: C::Opts,
    children: DashMap<String, C, LabelHasher>,
}

/// A family of same-named metrics split by label values. Children are created
/// lazily on first access and never removed. Cloning is cheap and every clone
/// shares the same children.
pub struct MetricVec<C: VecChild> {
    inner: Arc<VecInner<C>>,
}

impl<C: VecChild> Clone for MetricVec<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: VecChild> MetricVec<C> {
    pub(crate) fn from_parts(desc: Desc, interval: Duration, opts: C::Opts) -> Self {
        Self {
            inner: Arc::new(VecInner {
                desc: Arc::new(desc),
                interval,
                opts,
                children: DashMap::with_hasher(LabelHasher::default()),
            }),
        }
    }

    pub fn desc(&self) -> &Arc<Desc> {
        &self.inner.desc
    }

    /// Number of label combinations seen so far.
    pub fn len(&self) -> usize {
        self.inner.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.children.is_empty()
    }

    /// Return the child bound to `values`, given in the descriptor's label key
    /// order, creating it if this is the first time the combination is seen.
    pub fn try_with_label_values(&self, values: &[&str]) -> Result<C> {
        self.inner.desc.check_arity(values.len())?;
        Ok(self.get_or_create(values))
    }

    /// Like [`MetricVec::try_with_label_values`], but a label mismatch panics.
    /// Label schemas are static so a mismatch is a programming error.
    pub fn with_label_values(&self, values: &[&str]) -> C {
        match self.try_with_label_values(values) {
            Ok(child) => child,
            Err(e) => panic!("{e}"),
        }
    }

    /// Return the child bound to the given key/value pairs. Pairs may come in
    /// any order; every key must be declared by the descriptor. A declared key
    /// that is missing binds to the empty string.
    pub fn try_with(&self, labels: &[(&str, &str)]) -> Result<C> {
        let desc = &self.inner.desc;
        if let Some((key, _)) = labels.iter().find(|(k, _)| !desc.has_label_key(k)) {
            return Err(Error::UnknownLabelKey {
                name: desc.fq_name().to_string(),
                key: key.to_string(),
            });
        }
        let values: SmallVec<[&str; 8]> = desc
            .label_keys()
            .iter()
            .map(|key| {
                labels
                    .iter()
                    .rev()
                    .find(|(k, _)| *k == key.as_str())
                    .map(|(_, v)| *v)
                    .unwrap_or("")
            })
            .collect();
        Ok(self.get_or_create(&values))
    }

    /// Like [`MetricVec::try_with`], but an unknown key panics.
    pub fn with(&self, labels: &[(&str, &str)]) -> C {
        match self.try_with(labels) {
            Ok(child) => child,
            Err(e) => panic!("{e}"),
        }
    }

    fn get_or_create(&self, values: &[&str]) -> C {
        let inner = &*self.inner;
        let signature = inner.desc.signature(values);
        if let Some(child) = inner.children.get(&signature) {
            return child.value().clone();
        }
        // The entry holds the shard write lock, so two racing creators of the
        // same signature end up sharing one child.
        inner
            .children
            .entry(signature)
            .or_insert_with(|| {
                C::new_child(
                    inner.desc.clone(),
                    inner.desc.label_map(values),
                    inner.interval,
                    &inner.opts,
                )
            })
            .value()
            .clone()
    }
}

impl<C: VecChild> Collector for MetricVec<C> {
    fn interval(&self) -> Duration {
        self.inner.interval
    }

    fn describe(&self, sink: &mut dyn FnMut(Arc<Desc>)) {
        sink(self.inner.desc.clone())
    }

    fn collect(&self, sink: &mut dyn FnMut(Metric)) {
        // Snapshot the children first so no shard lock is held while a child
        // computes its statistics.
        let children: Vec<C> = self
            .inner
            .children
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for child in children {
            child.emit(sink);
        }
    }
}
