//! Slot bookkeeping for a fixed ring of render targets
//!
//! ```text
//! Free ──begin/finish_render──> Rendered ──acquire──> Locked ──release──> Free
//! ```
//!
//! A rendered slot that is never acquired is dropped back to Free when a
//! newer frame finishes.

use anyhow::{anyhow, bail, Result};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Rendered,
    Locked,
}

#[derive(Debug, Clone)]
pub struct SlotRing {
    states: Vec<SlotState>,
    cursor: usize,
}

impl SlotRing {
    pub fn new(len: usize) -> Self {
        Self {
            states: vec![SlotState::Free; len],
            cursor: 0,
        }
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    /// Next free slot to draw into, round-robin from the last one handed out
    pub fn begin_render(&mut self) -> Result<usize> {
        let len = self.states.len();
        let slot = (0..len)
            .map(|i| (self.cursor + i) % len)
            .find(|&i| self.states[i] == SlotState::Free)
            .ok_or_else(|| anyhow!("No free buffer in ring of {}", len))?;
        self.cursor = (slot + 1) % len;
        Ok(slot)
    }

    /// Mark `slot` as holding the newest picture
    pub fn finish_render(&mut self, slot: usize) -> Result<()> {
        match self.state(slot) {
            Some(SlotState::Free) => {}
            Some(state) => bail!("Slot {} finished rendering while {:?}", slot, state),
            None => bail!("Slot {} out of range", slot),
        }
        for state in self.states.iter_mut() {
            if *state == SlotState::Rendered {
                *state = SlotState::Free;
            }
        }
        self.states[slot] = SlotState::Rendered;
        Ok(())
    }

    /// Lock the newest rendered slot for scanout
    pub fn acquire(&mut self) -> Result<usize> {
        let slot = self
            .states
            .iter()
            .position(|&s| s == SlotState::Rendered)
            .ok_or_else(|| anyhow!("No rendered buffer to acquire"))?;
        self.states[slot] = SlotState::Locked;
        Ok(slot)
    }

    /// Return a locked slot to the free pool
    pub fn release(&mut self, slot: usize) {
        match self.state(slot) {
            Some(SlotState::Locked) => self.states[slot] = SlotState::Free,
            Some(state) => warn!("Release of slot {} in state {:?} ignored", slot, state),
            None => warn!("Release of unknown slot {} ignored", slot),
        }
    }

    #[cfg(test)]
    pub fn locked(&self) -> usize {
        self.states
            .iter()
            .filter(|&&s| s == SlotState::Locked)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(ring: &mut SlotRing) -> usize {
        let slot = ring.begin_render().unwrap();
        ring.finish_render(slot).unwrap();
        slot
    }

    #[test]
    fn test_flip_cycle_rotates_slots() {
        let mut ring = SlotRing::new(3);

        // Initial picture
        let shown = render(&mut ring);
        assert_eq!(ring.acquire().unwrap(), shown);

        // Frame 0 scheduled while the initial picture is displayed
        let next = render(&mut ring);
        assert_ne!(next, shown);
        assert_eq!(ring.acquire().unwrap(), next);
        assert_eq!(ring.locked(), 2);

        // Flip completes, old picture returns
        ring.release(shown);
        assert_eq!(ring.state(shown), Some(SlotState::Free));

        let after = render(&mut ring);
        assert_ne!(after, next);
        assert_eq!(ring.cursor, (after + 1) % 3);
    }

    #[test]
    fn test_two_slots_are_enough_for_double_buffering() {
        let mut ring = SlotRing::new(2);
        let mut shown = render(&mut ring);
        ring.acquire().unwrap();
        for _ in 0..5 {
            let next = render(&mut ring);
            assert_ne!(next, shown);
            ring.acquire().unwrap();
            ring.release(shown);
            shown = next;
        }
        assert_eq!(ring.locked(), 1);
    }

    #[test]
    fn test_exhausted_ring() {
        let mut ring = SlotRing::new(2);
        render(&mut ring);
        ring.acquire().unwrap();
        render(&mut ring);
        ring.acquire().unwrap();
        assert!(ring.begin_render().is_err());
    }

    #[test]
    fn test_newer_render_supersedes_unacquired() {
        let mut ring = SlotRing::new(3);
        let stale = render(&mut ring);
        let fresh = render(&mut ring);
        assert_eq!(ring.state(stale), Some(SlotState::Free));
        assert_eq!(ring.acquire().unwrap(), fresh);
        assert!(ring.acquire().is_err());
    }

    #[test]
    fn test_double_release_is_ignored() {
        let mut ring = SlotRing::new(2);
        let slot = render(&mut ring);
        ring.acquire().unwrap();
        ring.release(slot);
        ring.release(slot);
        ring.release(7);
        assert_eq!(ring.state(slot), Some(SlotState::Free));
        assert_eq!(ring.locked(), 0);
    }
}
