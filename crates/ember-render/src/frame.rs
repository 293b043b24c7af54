// SPDX-License-Identifier: CEPL-1.0
//! Bookkeeping for double-buffered frames.
//!
//! Each slot cycles `Idle -> Acquiring -> Recording -> Submitted -> Presenting`
//! and is picked up again from `Presenting` once its fence has been waited on.
//! The schedule only tracks order; the GPU side lives in the Vulkan backend.

use crate::error::ScheduleError;

pub const FRAMES_IN_FLIGHT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Clone)]
pub struct FrameSchedule {
    phases: Vec<SlotPhase>,
    current: usize,
    rendering: bool,
}

impl Default for FrameSchedule {
    fn default() -> Self {
        Self::new(FRAMES_IN_FLIGHT)
    }
}

impl FrameSchedule {
    pub fn new(slots: usize) -> Self {
        Self {
            phases: vec![SlotPhase::Idle; slots.max(1)],
            current: 0,
            rendering: false,
        }
    }

    pub fn slots(&self) -> usize {
        self.phases.len()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn phase(&self, slot: usize) -> SlotPhase {
        self.phases[slot]
    }

    pub fn is_recording(&self) -> bool {
        self.phases[self.current] == SlotPhase::Recording
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    /// Starts the current slot. A slot still `Presenting` from its last use is
    /// retired here; the caller waits its fence first.
    pub fn begin(&mut self) -> Result<usize, ScheduleError> {
        match self.phases[self.current] {
            SlotPhase::Idle | SlotPhase::Presenting => {
                self.phases[self.current] = SlotPhase::Acquiring;
                Ok(self.current)
            }
            found => Err(self.unexpected(SlotPhase::Idle, found)),
        }
    }

    /// Acquire failed; the slot goes back to idle without advancing.
    pub fn abort(&mut self) {
        self.phases[self.current] = SlotPhase::Idle;
        self.rendering = false;
    }

    pub fn acquired(&mut self) -> Result<(), ScheduleError> {
        self.step(SlotPhase::Acquiring, SlotPhase::Recording)
    }

    pub fn begin_rendering(&mut self) -> Result<(), ScheduleError> {
        self.expect(SlotPhase::Recording)?;
        if self.rendering {
            return Err(ScheduleError::RenderingAlreadyActive);
        }
        self.rendering = true;
        Ok(())
    }

    /// Draws are only legal between `begin_rendering` and `end_rendering`.
    pub fn check_draw(&self) -> Result<(), ScheduleError> {
        self.expect(SlotPhase::Recording)?;
        if !self.rendering {
            return Err(ScheduleError::RenderingNotActive);
        }
        Ok(())
    }

    pub fn end_rendering(&mut self) -> Result<(), ScheduleError> {
        self.check_draw()?;
        self.rendering = false;
        Ok(())
    }

    /// The current slot may be closed and submitted.
    pub fn check_submit(&self) -> Result<(), ScheduleError> {
        self.expect(SlotPhase::Recording)?;
        if self.rendering {
            return Err(ScheduleError::RenderingAlreadyActive);
        }
        Ok(())
    }

    /// The queue accepted the slot's work; its fence will signal.
    pub fn submitted(&mut self) -> Result<(), ScheduleError> {
        self.check_submit()?;
        self.phases[self.current] = SlotPhase::Submitted;
        Ok(())
    }

    /// Whether a wait on `slot`'s fence can complete. A `Recording` slot has
    /// reset its fence but nothing that would signal it reached the queue.
    pub fn fence_signals(&self, slot: usize) -> bool {
        self.phases[slot] != SlotPhase::Recording
    }

    /// Present was issued (or reported the surface out of date); moves to the next slot.
    pub fn presented(&mut self) -> Result<usize, ScheduleError> {
        self.step(SlotPhase::Submitted, SlotPhase::Presenting)?;
        self.current = (self.current + 1) % self.phases.len();
        Ok(self.current)
    }

    fn step(&mut self, from: SlotPhase, to: SlotPhase) -> Result<(), ScheduleError> {
        self.expect(from)?;
        self.phases[self.current] = to;
        Ok(())
    }

    fn expect(&self, expected: SlotPhase) -> Result<(), ScheduleError> {
        let found = self.phases[self.current];
        if found == expected {
            Ok(())
        } else {
            Err(self.unexpected(expected, found))
        }
    }

    fn unexpected(&self, expected: SlotPhase, found: SlotPhase) -> ScheduleError {
        ScheduleError::UnexpectedPhase {
            slot: self.current,
            expected,
            found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_frame(s: &mut FrameSchedule) -> usize {
        s.begin().unwrap();
        s.acquired().unwrap();
        s.begin_rendering().unwrap();
        s.check_draw().unwrap();
        s.check_draw().unwrap();
        s.end_rendering().unwrap();
        s.submitted().unwrap();
        s.presented().unwrap()
    }

    #[test]
    fn slots_alternate() {
        let mut s = FrameSchedule::default();
        let seq: Vec<usize> = (0..6).map(|_| full_frame(&mut s)).collect();
        assert_eq!(seq, [1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn one_cycle_advances_once_and_leaves_slot_in_flight() {
        let mut s = FrameSchedule::default();
        assert_eq!(s.current(), 0);
        full_frame(&mut s);
        assert_eq!(s.current(), 1);
        assert_eq!(s.phase(0), SlotPhase::Presenting);
        assert_eq!(s.phase(1), SlotPhase::Idle);

        full_frame(&mut s);
        // Slot 0 comes back still presenting; begin retires it.
        assert_eq!(s.phase(0), SlotPhase::Presenting);
        assert_eq!(s.begin().unwrap(), 0);
        assert_eq!(s.phase(0), SlotPhase::Acquiring);
    }

    #[test]
    fn aborted_acquire_keeps_slot() {
        let mut s = FrameSchedule::default();
        s.begin().unwrap();
        s.abort();
        assert_eq!(s.current(), 0);
        assert_eq!(s.phase(0), SlotPhase::Idle);
        assert_eq!(full_frame(&mut s), 1);
    }

    #[test]
    fn draw_outside_rendering_is_rejected() {
        let mut s = FrameSchedule::default();
        assert_eq!(
            s.check_draw(),
            Err(ScheduleError::UnexpectedPhase {
                slot: 0,
                expected: SlotPhase::Recording,
                found: SlotPhase::Idle
            })
        );
        s.begin().unwrap();
        s.acquired().unwrap();
        assert_eq!(s.check_draw(), Err(ScheduleError::RenderingNotActive));
        assert_eq!(s.end_rendering(), Err(ScheduleError::RenderingNotActive));
    }

    #[test]
    fn submit_with_open_rendering_is_rejected() {
        let mut s = FrameSchedule::default();
        s.begin().unwrap();
        s.acquired().unwrap();
        s.begin_rendering().unwrap();
        assert_eq!(
            s.begin_rendering(),
            Err(ScheduleError::RenderingAlreadyActive)
        );
        assert_eq!(s.submitted(), Err(ScheduleError::RenderingAlreadyActive));
        s.end_rendering().unwrap();
        s.submitted().unwrap();
    }

    #[test]
    fn unsubmitted_slot_fence_is_not_waited() {
        let mut s = FrameSchedule::default();
        assert!(s.fence_signals(0) && s.fence_signals(1));

        s.begin().unwrap();
        assert!(s.fence_signals(0));
        s.acquired().unwrap();
        s.begin_rendering().unwrap();
        s.end_rendering().unwrap();
        // Submission failed: the slot stays recording with a reset fence.
        s.check_submit().unwrap();
        assert_eq!(s.phase(0), SlotPhase::Recording);
        assert!(!s.fence_signals(0));
        assert!(s.fence_signals(1));

        s.submitted().unwrap();
        assert!(s.fence_signals(0));
        s.presented().unwrap();
        assert!(s.fence_signals(0));
    }

    #[test]
    fn double_begin_is_rejected() {
        let mut s = FrameSchedule::default();
        s.begin().unwrap();
        assert!(matches!(
            s.begin(),
            Err(ScheduleError::UnexpectedPhase {
                found: SlotPhase::Acquiring,
                ..
            })
        ));
        assert!(s.presented().is_err());
    }
}
