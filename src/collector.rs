//! The capability every registrable metric source implements.

use std::{sync::Arc, time::Duration};

use crate::{desc::Desc, metric::Metric};

/// A source of metrics that the [`Registry`](crate::Registry) samples on its
/// own schedule.
///
/// Both `describe` and `collect` push into a caller supplied sink rather than
/// returning a collection, since a label vector emits a number of items that
/// grows over its lifetime.
///
/// `collect` runs on a tokio worker and must not block. It is never
/// interrupted once started.
pub trait Collector: Send + Sync + 'static {
    /// How often the registry should call [`Collector::collect`].
    fn interval(&self) -> Duration;

    /// Emit every descriptor this collector can ever produce metrics for.
    fn describe(&self, sink: &mut dyn FnMut(Arc<Desc>));

    /// Emit the current snapshot.
    fn collect(&self, sink: &mut dyn FnMut(Metric));
}
