// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed-depth display queue between the decode engine and the sink.
//!
//! Pictures are admitted in presentation order and held for `depth` admissions before being
//! emitted, so that the engine can keep decoding ahead. The slots form a ring: the slot under the
//! cursor always holds the oldest pending picture, and admitting a new picture there emits the
//! previous occupant.
//!
//! A surface referenced by a pending slot must not be decoded into. `reserve_surface()` forces the
//! early emission of pending pictures until the surface is free again.

use base::warn;

use crate::backend::SurfaceIndex;
use crate::error::Error;
use crate::error::Result;

struct Slot<P> {
    surface: SurfaceIndex,
    picture: P,
}

pub struct ReorderQueue<P> {
    slots: Vec<Option<Slot<P>>>,
    cursor: usize,
}

impl<P> ReorderQueue<P> {
    /// Creates a queue holding up to `depth` pictures.
    pub fn new(depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(Error::InvalidParams(String::from(
                "reorder depth must be non-zero",
            )));
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(depth)
            .map_err(|_| Error::AllocationFailed {
                what: "reorder slots",
                size: depth,
            })?;
        slots.resize_with(depth, || None);
        Ok(ReorderQueue { slots, cursor: 0 })
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Number of pictures waiting to be emitted.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Whether a picture decoded into `surface` is still waiting to be emitted.
    pub fn is_pending(&self, surface: SurfaceIndex) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.surface == surface)
    }

    /// Emits the picture under the cursor, if any, and advances the cursor.
    ///
    /// Returns whether a picture was emitted.
    pub fn evict_oldest_if_pending<F: FnMut(P)>(&mut self, mut emit: F) -> bool {
        let evicted = self.slots[self.cursor].take();
        self.cursor = (self.cursor + 1) % self.slots.len();
        match evicted {
            Some(slot) => {
                emit(slot.picture);
                true
            }
            None => false,
        }
    }

    /// Emits pending pictures, oldest first, until `surface` is no longer referenced by any slot.
    ///
    /// Returns the number of pictures emitted ahead of their time.
    pub fn reserve_surface<F: FnMut(P)>(&mut self, surface: SurfaceIndex, mut emit: F) -> usize {
        let mut emitted = 0;
        while self.is_pending(surface) {
            if self.evict_oldest_if_pending(&mut emit) {
                emitted += 1;
            }
        }
        emitted
    }

    /// Queues `picture`, decoded into `surface`, emitting the oldest pending picture if the queue
    /// is full.
    ///
    /// If `surface` is still pending, which means the engine decoded into a surface that was never
    /// reserved, the pending pictures up to and including it are emitted first. Returns the number
    /// of pictures emitted early for that reason.
    pub fn admit<F: FnMut(P)>(&mut self, surface: SurfaceIndex, picture: P, mut emit: F) -> usize {
        let forced = if self.is_pending(surface) {
            warn!(
                "surface {} decoded into while still pending display, emitting early",
                surface
            );
            self.reserve_surface(surface, &mut emit)
        } else {
            0
        };

        let previous = self.slots[self.cursor].replace(Slot { surface, picture });
        if let Some(previous) = previous {
            emit(previous.picture);
        }
        self.cursor = (self.cursor + 1) % self.slots.len();
        forced
    }

    /// Emits every pending picture, oldest first.
    pub fn drain<F: FnMut(P)>(&mut self, mut emit: F) -> usize {
        let mut emitted = 0;
        for _ in 0..self.slots.len() {
            if self.evict_oldest_if_pending(&mut emit) {
                emitted += 1;
            }
        }
        self.cursor = 0;
        emitted
    }

    /// Drops every pending picture without emitting it. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let discarded = self.pending();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.cursor = 0;
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Admits `(surface, picture)` pairs and returns everything emitted along the way.
    fn admit_all(queue: &mut ReorderQueue<u64>, pictures: &[(SurfaceIndex, u64)]) -> Vec<u64> {
        let mut emitted = Vec::new();
        for &(surface, picture) in pictures {
            queue.admit(surface, picture, |p| emitted.push(p));
        }
        emitted
    }

    #[test]
    fn zero_depth_rejected() {
        assert!(matches!(
            ReorderQueue::<u64>::new(0),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn fifth_admit_emits_first_picture() {
        let mut queue = ReorderQueue::new(4).unwrap();
        let emitted = admit_all(&mut queue, &[(0, 100), (1, 101), (2, 102), (3, 103)]);
        assert!(emitted.is_empty());
        assert_eq!(queue.pending(), 4);

        let emitted = admit_all(&mut queue, &[(4, 104)]);
        assert_eq!(emitted, vec![100]);
        assert!(!queue.is_pending(0));
        assert!(queue.is_pending(4));
    }

    #[test]
    fn every_picture_emitted_once_in_order() {
        let mut queue = ReorderQueue::new(3).unwrap();
        let pictures: Vec<(SurfaceIndex, u64)> = (0..10).map(|i| ((i % 5) as u32, i)).collect();
        let mut emitted = Vec::new();
        for &(surface, picture) in &pictures {
            queue.reserve_surface(surface, |p| emitted.push(p));
            queue.admit(surface, picture, |p| emitted.push(p));
        }
        queue.drain(|p| emitted.push(p));

        assert_eq!(emitted, (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn reserve_surface_forces_early_emission() {
        let mut queue = ReorderQueue::new(4).unwrap();
        admit_all(&mut queue, &[(0, 10), (1, 11), (2, 12)]);

        let mut emitted = Vec::new();
        assert_eq!(queue.reserve_surface(1, |p| emitted.push(p)), 2);
        assert_eq!(emitted, vec![10, 11]);
        assert!(!queue.is_pending(1));
        assert_eq!(queue.pending(), 1);

        // Reserving a surface that is not pending emits nothing.
        assert_eq!(queue.reserve_surface(7, |p| emitted.push(p)), 0);
        assert_eq!(emitted.len(), 2);
    }

    #[test]
    fn admit_of_pending_surface_evicts_it_first() {
        let mut queue = ReorderQueue::new(4).unwrap();
        admit_all(&mut queue, &[(0, 10), (1, 11)]);

        let mut emitted = Vec::new();
        let forced = queue.admit(0, 12, |p| emitted.push(p));
        assert_eq!(forced, 1);
        // Eviction moved the cursor onto surface 1's slot, which is now the oldest.
        assert_eq!(emitted, vec![10, 11]);
        assert_eq!(queue.pending(), 1);

        queue.drain(|p| emitted.push(p));
        assert_eq!(emitted, vec![10, 11, 12]);
    }

    #[test]
    fn evict_always_advances() {
        let mut queue = ReorderQueue::new(2).unwrap();
        let mut emitted = Vec::new();
        assert!(!queue.evict_oldest_if_pending(|p| emitted.push(p)));
        queue.admit(5, 50, |p| emitted.push(p));
        queue.admit(6, 60, |p| emitted.push(p));
        assert!(queue.evict_oldest_if_pending(|p| emitted.push(p)));
        assert_eq!(emitted, vec![50]);
    }

    #[test]
    fn discard_drops_without_emission() {
        let mut queue = ReorderQueue::new(4).unwrap();
        let emitted = admit_all(&mut queue, &[(0, 1), (1, 2), (2, 3)]);
        assert!(emitted.is_empty());

        assert_eq!(queue.discard(), 3);
        assert!(queue.is_empty());

        let mut emitted = Vec::new();
        assert_eq!(queue.drain(|p| emitted.push(p)), 0);
        assert!(emitted.is_empty());
    }
}
