use log::{debug, trace, warn};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::{FilterState, Released};
use crate::filter_internal::{Stage, is_fault};
use crate::pipe::PipeStats;

/// Internal pipe implementation that drives event batches through the stages.
///
/// # Drive Cycle
///
/// A drive carries one batch from a starting stage to the end of the stack in
/// one direction:
///
/// ```text
/// upward:    batch → stage[from] → stage[from+1] → ... → stage[n-1] → application
/// downward:  batch → stage[top-1] → ... → stage[0] → transport
/// ```
///
/// Each stage consumes the whole batch staged for it before the next stage
/// runs, so at most one batch is held between two adjacent stages. Filters only
/// emit in response to input, so a stage that returns nothing ends the drive
/// early: the stack is quiescent until more input arrives. A drive therefore
/// costs at most one filter call per staged event per stage.
///
/// # Faults
///
/// When a stage faults, the rest of its batch is dropped, every remaining stage
/// in the direction of travel is shown the fault so it can clean up, and the
/// fault event alone is the drive's output.
///
/// A stage can also close partway through a batch (it saw `Close` and had
/// nothing left to drain). It rejects the events staged behind the `Close`;
/// those are dropped and counted, and the drive carries on with what the
/// stage did accept.
pub(crate) struct PipeInternal {
    /// Stages ordered bottom (nearest transport) to top (nearest application)
    stages: Vec<Stage>,

    /// Set once `close()` has completed
    closed: bool,

    stats: PipeStats,
}

impl PipeInternal {
    pub(crate) fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            closed: false,
            stats: PipeStats::default(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub(crate) fn stage_state(&self, index: usize) -> Option<FilterState> {
        self.stages.get(index).map(Stage::state)
    }

    pub(crate) fn stats(&self) -> PipeStats {
        self.stats
    }

    pub(crate) fn state(&self) -> FilterState {
        let states = || self.stages.iter().map(Stage::state);
        if states().any(|s| s == FilterState::Faulted) {
            FilterState::Faulted
        } else if self.closed || (!self.stages.is_empty() && states().all(|s| s == FilterState::Closed)) {
            FilterState::Closed
        } else if states().any(|s| s != FilterState::Open) {
            FilterState::Closing
        } else {
            FilterState::Open
        }
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        let state = self.state();
        if state.is_accepting() {
            Ok(())
        } else {
            Err(Error::state("pipe", state))
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        if !self.closed {
            debug!("pipe [{}] closed", self.names().join(" | "));
            self.closed = true;
        }
    }

    /// Drives `batch` upward starting at stage `from`.
    pub(crate) fn drive_up(&mut self, from: usize, mut batch: Vec<Event>) -> Result<Vec<Event>> {
        self.stats.drives += 1;
        for index in from..self.stages.len() {
            self.stats.peak_batch = self.stats.peak_batch.max(batch.len());
            let mut next = Vec::new();
            for event in batch {
                self.stats.filter_calls += 1;
                let output = match self.stages[index].push_up(event) {
                    Ok(output) => output,
                    Err(err @ Error::State { .. })
                        if index != from && self.stages[index].state() == FilterState::Closed =>
                    {
                        self.reject(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                if let Some(fault) = split_fault(output, &mut next) {
                    self.spread_fault(index + 1..self.stages.len(), &fault, true);
                    return Ok(vec![fault]);
                }
            }
            if next.is_empty() {
                trace!("quiescent at {} going up", self.stages[index].name());
                return Ok(next);
            }
            batch = next;
        }
        Ok(batch)
    }

    /// Drives `batch` downward starting at the stage just below `top`.
    pub(crate) fn drive_down(&mut self, top: usize, mut batch: Vec<Event>) -> Result<Vec<Event>> {
        self.stats.drives += 1;
        for index in (0..top).rev() {
            self.stats.peak_batch = self.stats.peak_batch.max(batch.len());
            let mut next = Vec::new();
            for event in batch {
                self.stats.filter_calls += 1;
                let output = match self.stages[index].push_down(event) {
                    Ok(output) => output,
                    Err(err @ Error::State { .. })
                        if index != top - 1 && self.stages[index].state() == FilterState::Closed =>
                    {
                        self.reject(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                if let Some(fault) = split_fault(output, &mut next) {
                    self.spread_fault(0..index, &fault, false);
                    return Ok(vec![fault]);
                }
            }
            if next.is_empty() {
                trace!("quiescent at {} going down", self.stages[index].name());
                return Ok(next);
            }
            batch = next;
        }
        Ok(batch)
    }

    /// Runs every stage's timeout handler top to bottom. What a stage releases
    /// downward is driven through the stages beneath it and what it releases
    /// upward through the stages above it.
    pub(crate) fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        let mut released = Released::default();
        for index in (0..self.stages.len()).rev() {
            let Released { up, down } = self.stages[index].handle_timeout(now)?;

            let mut batch = Vec::new();
            if let Some(fault) = split_fault(down, &mut batch) {
                self.spread_fault(0..index, &fault, false);
                released.down.push(fault);
                return Ok(released);
            }
            if !batch.is_empty() {
                let output = self.drive_down(index, batch)?;
                let faulted = output.last().is_some_and(is_fault);
                released.down.extend(output);
                if faulted {
                    return Ok(released);
                }
            }

            let mut batch = Vec::new();
            if let Some(fault) = split_fault(up, &mut batch) {
                self.spread_fault(index + 1..self.stages.len(), &fault, true);
                released.up.push(fault);
                return Ok(released);
            }
            if !batch.is_empty() {
                let output = self.drive_up(index + 1, batch)?;
                let faulted = output.last().is_some_and(is_fault);
                released.up.extend(output);
                if faulted {
                    return Ok(released);
                }
            }
        }
        Ok(released)
    }

    pub(crate) fn poll_timeout(&self, eto: &mut Instant) {
        for stage in &self.stages {
            stage.poll_timeout(eto);
        }
    }

    /// A stage that closed partway through a batch rejects the rest of it; what
    /// was staged before the close is still delivered.
    fn reject(&mut self, err: Error) {
        warn!("dropping staged event: {}", err);
        self.stats.rejected += 1;
    }

    fn spread_fault(&mut self, range: std::ops::Range<usize>, fault: &Event, upward: bool) {
        let indices: Vec<usize> = if upward { range.collect() } else { range.rev().collect() };
        for index in indices {
            self.stages[index].absorb_fault(fault, upward);
        }
    }
}

/// Moves `output` into `next` up to the first fault, which is returned.
fn split_fault(output: Vec<Event>, next: &mut Vec<Event>) -> Option<Event> {
    for event in output {
        if is_fault(&event) {
            return Some(event);
        }
        next.push(event);
    }
    None
}
