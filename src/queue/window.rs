use std::iter::FusedIterator;

use super::Playlist;
use crate::player::QueueItem;

/// One entry of a [`QueueWindow`].
#[derive(Debug, Clone)]
pub struct WindowEntry {
    /// 1-based position in the whole queue.
    pub display_index: usize,
    pub item: QueueItem,
    pub previous: Option<QueueItem>,
    pub next: Option<QueueItem>,
    /// The previous entry was queued by someone else.
    pub first_of_requester_run: bool,
    /// The next entry is queued by someone else.
    pub last_of_requester_run: bool,
}

/// Single-pass cursor over `count` entries of a playlist starting at `begin`,
/// for grouping entries by requester when listing the queue.
pub struct QueueWindow {
    items: Vec<QueueItem>,
    position: usize,
    end: usize,
}

impl QueueWindow {
    pub fn new(playlist: &Playlist, begin: usize, count: usize) -> Self {
        let items = playlist.items();
        let end = begin.saturating_add(count).min(items.len());
        Self {
            items,
            position: begin.min(end),
            end,
        }
    }

    /// Windows cannot be rewound; create a new one instead.
    pub fn reset(&mut self) -> ! {
        panic!("QueueWindow is single-pass and cannot be reset");
    }
}

impl Iterator for QueueWindow {
    type Item = WindowEntry;

    fn next(&mut self) -> Option<WindowEntry> {
        if self.position >= self.end {
            return None;
        }
        let index = self.position;
        self.position += 1;

        let item = self.items[index].clone();
        let previous = index
            .checked_sub(1)
            .and_then(|i| self.items.get(i))
            .cloned();
        let next = self.items.get(index + 1).cloned();
        let first_of_requester_run = previous
            .as_ref()
            .is_none_or(|p| p.requester() != item.requester());
        let last_of_requester_run = next
            .as_ref()
            .is_none_or(|n| n.requester() != item.requester());

        Some(WindowEntry {
            display_index: index + 1,
            item,
            previous,
            next,
            first_of_requester_run,
            last_of_requester_run,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.end - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for QueueWindow {}

impl FusedIterator for QueueWindow {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::types::UserId, testing::track};

    fn playlist(requesters: &[u64]) -> Playlist {
        let playlist = Playlist::new(100);
        let items = requesters
            .iter()
            .enumerate()
            .map(|(i, &user)| {
                QueueItem::from_track(track(&format!("t{i}"), 1000))
                    .with_requester(Some(UserId(user)))
            })
            .collect();
        playlist.insert(None, items).unwrap();
        playlist
    }

    #[test]
    fn test_requester_runs() {
        let playlist = playlist(&[1, 1, 2, 1, 1]);
        let runs: Vec<(usize, bool, bool)> = QueueWindow::new(&playlist, 0, 5)
            .map(|e| {
                (
                    e.display_index,
                    e.first_of_requester_run,
                    e.last_of_requester_run,
                )
            })
            .collect();
        assert_eq!(
            runs,
            vec![
                (1, true, false),
                (2, false, true),
                (3, true, true),
                (4, true, false),
                (5, false, true),
            ]
        );
    }

    #[test]
    fn test_window_looks_past_its_edges() {
        let playlist = playlist(&[1, 1, 1, 2]);
        let entries: Vec<WindowEntry> = QueueWindow::new(&playlist, 1, 2).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].display_index, 2);
        assert_eq!(entries[0].previous.as_ref().unwrap().identity(), "t0");
        assert!(!entries[0].first_of_requester_run);
        assert_eq!(entries[1].next.as_ref().unwrap().identity(), "t3");
        assert!(entries[1].last_of_requester_run);
    }

    #[test]
    fn test_window_clamped_to_queue() {
        let playlist = playlist(&[1, 2]);
        assert_eq!(QueueWindow::new(&playlist, 1, 10).len(), 1);
        assert_eq!(QueueWindow::new(&playlist, 5, 10).count(), 0);
    }

    #[test]
    #[should_panic(expected = "single-pass")]
    fn test_reset_panics() {
        let playlist = playlist(&[1]);
        let mut window = QueueWindow::new(&playlist, 0, 1);
        window.next();
        window.reset();
    }
}
