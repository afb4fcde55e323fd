use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::{
    common::{PlayerError, PlayerResult},
    player::{EventHub, QueueItem, Subscription, TrackLookup},
    protocol::Track,
};

/// Mutation notifications of a [`Playlist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueChange {
    Added { at: usize, count: usize },
    Removed { at: usize },
    Cleared,
    Shuffled,
    CursorMoved(Option<usize>),
}

struct PlaylistInner {
    items: Vec<QueueItem>,
    index: Option<usize>,
}

impl PlaylistInner {
    fn shift_for_insert(&mut self, at: usize, count: usize) {
        if let Some(index) = self.index.as_mut() {
            if at <= *index {
                *index += count;
            }
        }
    }
}

/// The ordered queue of a player plus its cursor.
///
/// Every method takes the lock for one short critical section; nothing is
/// held across an await.
pub struct Playlist {
    inner: Mutex<PlaylistInner>,
    changes: EventHub<QueueChange>,
    capacity: usize,
}

impl Playlist {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PlaylistInner {
                items: Vec::new(),
                index: None,
            }),
            changes: EventHub::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Free slots under the capacity.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.inner.lock().items.clone()
    }

    /// Items and cursor, read together.
    pub fn snapshot(&self) -> (Vec<QueueItem>, Option<usize>) {
        let inner = self.inner.lock();
        (inner.items.clone(), inner.index)
    }

    pub fn get(&self, index: usize) -> Option<QueueItem> {
        self.inner.lock().items.get(index).cloned()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.lock().index
    }

    pub fn current(&self) -> Option<QueueItem> {
        let inner = self.inner.lock();
        inner.index.and_then(|i| inner.items.get(i).cloned())
    }

    /// The entry right after the cursor.
    pub fn upcoming(&self) -> Option<QueueItem> {
        let inner = self.inner.lock();
        let next = inner.index.map_or(0, |i| i + 1);
        inner.items.get(next).cloned()
    }

    pub fn subscribe(&self) -> Subscription<QueueChange> {
        self.changes.subscribe()
    }

    /// Moves the cursor. Fails if `index` is out of range.
    pub fn set_index(&self, index: Option<usize>) -> bool {
        let moved = {
            let mut inner = self.inner.lock();
            if index.is_some_and(|i| i >= inner.items.len()) {
                return false;
            }
            std::mem::replace(&mut inner.index, index) != index
        };
        if moved {
            self.changes.publish(QueueChange::CursorMoved(index));
        }
        true
    }

    /// Inserts all of `items` at `position` (appends if `None` or past the
    /// end), or nothing if they do not all fit. Returns where they landed.
    pub fn insert(&self, position: Option<usize>, items: Vec<QueueItem>) -> PlayerResult<usize> {
        let count = items.len();
        let at = {
            let mut inner = self.inner.lock();
            if inner.items.len() + count > self.capacity {
                return Err(PlayerError::QueueFull {
                    limit: self.capacity,
                });
            }
            let at = position.map_or(inner.items.len(), |p| p.min(inner.items.len()));
            inner.items.splice(at..at, items);
            inner.shift_for_insert(at, count);
            at
        };
        self.changes.publish(QueueChange::Added { at, count });
        Ok(at)
    }

    /// Like [`Self::insert`], but inserts as many leading items as fit.
    /// Returns where they landed and how many were inserted.
    pub fn insert_fitting(
        &self,
        position: Option<usize>,
        mut items: Vec<QueueItem>,
    ) -> (usize, usize) {
        let (at, count) = {
            let mut inner = self.inner.lock();
            items.truncate(self.capacity.saturating_sub(inner.items.len()));
            let count = items.len();
            let at = position.map_or(inner.items.len(), |p| p.min(inner.items.len()));
            inner.items.splice(at..at, items);
            inner.shift_for_insert(at, count);
            (at, count)
        };
        if count > 0 {
            self.changes.publish(QueueChange::Added { at, count });
        }
        (at, count)
    }

    /// Removes one entry. Removing the current entry moves the cursor back
    /// by one, so the following entry is the next to play.
    pub fn remove(&self, index: usize) -> Option<QueueItem> {
        let removed = {
            let mut inner = self.inner.lock();
            if index >= inner.items.len() {
                return None;
            }
            let removed = inner.items.remove(index);
            inner.index = match inner.index {
                Some(current) if index < current => Some(current - 1),
                Some(current) if index == current => current.checked_sub(1),
                other => other,
            };
            removed
        };
        self.changes.publish(QueueChange::Removed { at: index });
        Some(removed)
    }

    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.items.clear();
            inner.index = None;
        }
        self.changes.publish(QueueChange::Cleared);
    }

    /// Shuffles the entries after the cursor.
    pub fn shuffle(&self) {
        {
            let mut inner = self.inner.lock();
            let from = inner.index.map_or(0, |i| i + 1);
            if let Some(upcoming) = inner.items.get_mut(from..) {
                upcoming.shuffle(&mut rand::thread_rng());
            }
        }
        self.changes.publish(QueueChange::Shuffled);
    }

    /// Position of the entry the node reported as `track`, preferring the
    /// cursor. Lazy entries match on their identifier or URI.
    pub fn find(&self, track: &Track) -> Option<usize> {
        let inner = self.inner.lock();
        inner
            .index
            .filter(|&i| inner.items.get(i).is_some_and(|c| c.matches(track)))
            .or_else(|| inner.items.iter().position(|c| c.matches(track)))
    }

    /// Points the cursor at the entry for `track`, scanning the queue if the
    /// entry under the cursor is a different one. Leaves the cursor alone if
    /// `track` is not queued.
    pub fn reconcile(&self, track: &Track) -> Option<usize> {
        let index = self.find(track)?;
        self.set_index(Some(index));
        Some(index)
    }
}

impl TrackLookup for Playlist {
    fn lookup(&self, track: &Track) -> Option<QueueItem> {
        let inner = self.inner.lock();
        let under_cursor = inner
            .index
            .and_then(|i| inner.items.get(i))
            .filter(|item| item.matches(track));
        under_cursor
            .or_else(|| inner.items.iter().find(|item| item.matches(track)))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::track;

    fn playlist(ids: &[&str], capacity: usize) -> Playlist {
        let playlist = Playlist::new(capacity);
        let items = ids
            .iter()
            .map(|id| QueueItem::from_track(track(id, 1000)))
            .collect();
        playlist.insert(None, items).unwrap();
        playlist
    }

    fn identities(playlist: &Playlist) -> Vec<String> {
        playlist
            .items()
            .iter()
            .map(|i| i.identity().to_string())
            .collect()
    }

    #[test]
    fn test_insert_before_cursor_shifts_it() {
        let playlist = playlist(&["a", "b", "c"], 10);
        playlist.set_index(Some(1));

        playlist
            .insert(Some(0), vec![QueueItem::from_identifier("x")])
            .unwrap();
        assert_eq!(playlist.current_index(), Some(2));
        assert_eq!(playlist.current().unwrap().identity(), "b");

        playlist
            .insert(Some(3), vec![QueueItem::from_identifier("y")])
            .unwrap();
        assert_eq!(playlist.current_index(), Some(2));
        assert_eq!(identities(&playlist), ["x", "a", "b", "y", "c"]);
    }

    #[test]
    fn test_strict_insert_is_all_or_nothing() {
        let playlist = playlist(&["a", "b"], 3);
        let err = playlist
            .insert(
                None,
                vec![QueueItem::from_identifier("x"), QueueItem::from_identifier("y")],
            )
            .unwrap_err();
        assert!(matches!(err, PlayerError::QueueFull { limit: 3 }));
        assert_eq!(playlist.len(), 2);

        let (at, count) = playlist.insert_fitting(
            None,
            vec![QueueItem::from_identifier("x"), QueueItem::from_identifier("y")],
        );
        assert_eq!((at, count), (2, 1));
        assert_eq!(identities(&playlist), ["a", "b", "x"]);
    }

    #[test]
    fn test_remove_current_moves_cursor_back() {
        let playlist = playlist(&["a", "b", "c"], 10);
        playlist.set_index(Some(1));
        assert_eq!(playlist.remove(1).unwrap().identity(), "b");
        assert_eq!(playlist.current_index(), Some(0));
        assert_eq!(playlist.upcoming().unwrap().identity(), "c");

        playlist.set_index(Some(0));
        playlist.remove(0);
        assert_eq!(playlist.current_index(), None);
        assert_eq!(playlist.upcoming().unwrap().identity(), "c");
    }

    #[test]
    fn test_reconcile_scans_when_cursor_is_stale() {
        let playlist = playlist(&["a", "b", "c"], 10);
        playlist.set_index(Some(0));
        let changes = playlist.subscribe();

        assert_eq!(playlist.reconcile(&track("c", 1000)), Some(2));
        assert_eq!(playlist.current_index(), Some(2));
        assert_eq!(changes.drain(), vec![QueueChange::CursorMoved(Some(2))]);

        assert_eq!(playlist.reconcile(&track("zzz", 1000)), None);
        assert_eq!(playlist.current_index(), Some(2));
    }

    #[test]
    fn test_find_matches_lazy_entries_by_uri() {
        let playlist = Playlist::new(10);
        playlist
            .insert(
                None,
                vec![
                    QueueItem::from_identifier("https://example.com/watch?v=abc"),
                    QueueItem::from_identifier("https://example.com/watch?v=def"),
                ],
            )
            .unwrap();

        let mut reported = track("def", 1000);
        reported.info.uri = Some("https://example.com/watch?v=def".to_string());
        assert_eq!(playlist.find(&reported), Some(1));
        assert_eq!(playlist.reconcile(&reported), Some(1));
        assert_eq!(playlist.current_index(), Some(1));
    }

    #[test]
    fn test_lookup_prefers_entry_under_cursor() {
        let playlist = Playlist::new(10);
        let first = QueueItem::from_track(track("a", 1000)).with_requester(Some(1.into()));
        let second = QueueItem::from_track(track("a", 1000)).with_requester(Some(2.into()));
        playlist.insert(None, vec![first, second]).unwrap();
        playlist.set_index(Some(1));

        let found = playlist.lookup(&track("a", 1000)).unwrap();
        assert_eq!(found.requester(), Some(2.into()));
    }

    #[test]
    fn test_shuffle_keeps_played_entries() {
        let playlist = playlist(&["a", "b", "c", "d", "e", "f"], 10);
        playlist.set_index(Some(1));
        playlist.shuffle();

        let ids = identities(&playlist);
        assert_eq!(&ids[..2], ["a", "b"]);
        let mut rest = ids[2..].to_vec();
        rest.sort();
        assert_eq!(rest, ["c", "d", "e", "f"]);
    }

    #[test]
    fn test_set_index_out_of_range() {
        let playlist = playlist(&["a"], 10);
        assert!(!playlist.set_index(Some(1)));
        assert!(playlist.set_index(Some(0)));
        assert!(playlist.set_index(None));
    }
}
