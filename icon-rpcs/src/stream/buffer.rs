//! A bounded, deduplicating FIFO buffer for decoded subscription
//! notifications, generalized over the item type so this crate doesn't need
//! to know about ticks or event logs.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

/// The key a buffered item is deduplicated on: `(height, hash, index?)`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DedupKey {
    /// Block height the item belongs to.
    pub height: i64,
    /// Block or transaction hash the item belongs to.
    pub hash: String,
    /// Transaction index within the block, when the item is scoped to one.
    pub index: Option<i64>,
}

/// Anything that can be buffered by [`StreamBuffer`].
pub trait BufferItem: Send + 'static {
    /// The height this item belongs to, used for the watermark and for
    /// `pop`'s "max height popped" bookkeeping.
    fn height(&self) -> i64;
    /// The key used to deduplicate this item against ones already buffered.
    fn dedup_key(&self) -> DedupKey;
}

struct Inner<T> {
    items: VecDeque<(DedupKey, T)>,
    seen: HashSet<DedupKey>,
    current_height: i64,
}

/// A bounded FIFO of decoded notifications, deduplicated on `(height, hash,
/// index?)`, with occupancy introspection and a height watermark that
/// advances independently of buffer occupancy (see [`StreamBuffer::observe_height`]).
pub struct StreamBuffer<T> {
    inner: Mutex<Inner<T>>,
    max_size: usize,
    observed_height: AtomicI64,
}

impl<T: BufferItem> StreamBuffer<T> {
    /// Construct an empty buffer that holds at most `max_size` items.
    pub fn new(max_size: usize) -> Self {
        StreamBuffer {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                seen: HashSet::new(),
                current_height: 0,
            }),
            max_size: max_size.max(1),
            observed_height: AtomicI64::new(0),
        }
    }

    /// Insert `items`, skipping any whose dedup key has already been seen
    /// (whether still buffered or already popped) and stopping once the
    /// buffer reaches `max_size`. Returns the number of items actually
    /// inserted.
    pub fn put(&self, items: impl IntoIterator<Item = T>) -> usize {
        let mut inner = self.inner.lock();
        let mut inserted = 0;
        for item in items {
            if inner.items.len() >= self.max_size {
                break;
            }
            let key = item.dedup_key();
            if inner.seen.contains(&key) {
                continue;
            }
            inner.seen.insert(key.clone());
            inner.items.push_back((key, item));
            inserted += 1;
        }
        inserted
    }

    /// Pop up to `n` items, oldest first. Each popped item's key is
    /// un-dedup'd so a future identical key (e.g. after a crash-restart
    /// replays the same notification) is accepted again. `current_height`
    /// becomes the maximum height among the popped items, and never
    /// decreases; it is left unchanged if nothing was popped.
    pub fn pop(&self, n: usize) -> Vec<T> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(n.min(inner.items.len()));
        let mut max_height = None;
        for _ in 0..n {
            let Some((key, item)) = inner.items.pop_front() else {
                break;
            };
            inner.seen.remove(&key);
            max_height = Some(max_height.map_or(item.height(), |h: i64| h.max(item.height())));
            out.push(item);
        }
        if let Some(h) = max_height {
            inner.current_height = inner.current_height.max(h);
        }
        out
    }

    /// Current occupancy.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` exactly when `len() == max_size`.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    /// Remaining capacity as a fraction of `max_size`, in `[0.0, 1.0]`.
    pub fn space_left(&self) -> f64 {
        let used = self.len().min(self.max_size);
        1.0 - (used as f64 / self.max_size as f64)
    }

    /// The height watermark derived from popped items (never decreases).
    pub fn current_height(&self) -> i64 {
        self.inner.lock().current_height
    }

    /// Record that a notification at `height` was observed on the wire,
    /// independently of whether it was successfully buffered. This side
    /// channel lets height tracking advance even while the ordered buffer
    /// is full or a notification fails to decode, so a crash-restart can
    /// resume from approximately the right place.
    pub fn observe_height(&self, height: i64) {
        self.observed_height.fetch_max(height, Ordering::Relaxed);
    }

    /// The last height observed via [`StreamBuffer::observe_height`].
    pub fn observed_height(&self) -> i64 {
        self.observed_height.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(i64, &'static str);
    impl BufferItem for Item {
        fn height(&self) -> i64 {
            self.0
        }
        fn dedup_key(&self) -> DedupKey {
            DedupKey {
                height: self.0,
                hash: self.1.to_string(),
                index: None,
            }
        }
    }

    #[test]
    fn put_deduplicates_by_key() {
        let buffer = StreamBuffer::new(10);
        assert_eq!(buffer.put(vec![Item(1, "a"), Item(1, "a"), Item(2, "b")]), 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn put_stops_at_max_size() {
        let buffer = StreamBuffer::new(2);
        assert_eq!(buffer.put(vec![Item(1, "a"), Item(2, "b"), Item(3, "c")]), 2);
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn pop_advances_current_height_and_un_dedups() {
        let buffer = StreamBuffer::new(10);
        buffer.put(vec![Item(1, "a"), Item(2, "b")]);
        let popped = buffer.pop(1);
        assert_eq!(popped.len(), 1);
        assert_eq!(buffer.current_height(), 1);

        // "a" at height 1 was un-dedup'd when popped, so it can be re-accepted.
        assert_eq!(buffer.put(vec![Item(1, "a")]), 1);
    }

    #[test]
    fn pop_never_decreases_current_height() {
        let buffer = StreamBuffer::new(10);
        buffer.put(vec![Item(5, "a")]);
        buffer.pop(1);
        assert_eq!(buffer.current_height(), 5);
        // popping nothing further must not reset the watermark
        assert_eq!(buffer.pop(1).len(), 0);
        assert_eq!(buffer.current_height(), 5);
    }

    #[test]
    fn observe_height_is_independent_of_buffer_occupancy() {
        let buffer: StreamBuffer<Item> = StreamBuffer::new(1);
        buffer.put(vec![Item(1, "a")]);
        assert!(buffer.is_full());
        buffer.observe_height(100);
        assert_eq!(buffer.observed_height(), 100);
        assert_eq!(buffer.current_height(), 0);

        buffer.observe_height(42);
        assert_eq!(buffer.observed_height(), 100, "watermark must not move backwards");
    }

    #[test]
    fn space_left_reflects_occupancy() {
        let buffer = StreamBuffer::new(4);
        assert_eq!(buffer.space_left(), 1.0);
        buffer.put(vec![Item(1, "a"), Item(2, "b")]);
        assert_eq!(buffer.space_left(), 0.5);
    }
}
