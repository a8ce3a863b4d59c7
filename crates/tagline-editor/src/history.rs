//! Undo/redo over whole-context snapshots.
//!
//! A snapshot is the drawing layer's exported scene for one context plus
//! that context's stroke metadata, encoded together with MessagePack. The
//! two always travel as one unit, so an undo can never restore geometry
//! without its labels and measurements or the other way around.
//!
//! The bottom of the undo stack is the initial state and is never popped.
//! Restoring is asynchronous: the history stays locked from the moment a
//! scene load starts until the host reports completion (or the restore
//! times out), and `capture` is refused while locked.

use crate::surface::{LoadTicket, SceneData, Surface, SurfaceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tagline_core::{ContextSnapshot, ImageContext, StrokeStore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("snapshot encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("snapshot is corrupt: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// One immutable, self-contained history entry.
#[derive(Debug, Clone)]
pub struct Snapshot {
    context: ImageContext,
    taken_at: DateTime<Utc>,
    body: Vec<u8>,
}

impl Snapshot {
    /// Rebuild a snapshot from bytes previously read with `body()`.
    pub fn from_parts(context: ImageContext, taken_at: DateTime<Utc>, body: Vec<u8>) -> Self {
        Self {
            context,
            taken_at,
            body,
        }
    }

    pub fn context(&self) -> ImageContext {
        self.context
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Encoded scene + metadata. Two snapshots of the same state have the
    /// same body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn decode(&self) -> Result<SnapshotBody, HistoryError> {
        Ok(rmp_serde::from_slice(&self.body)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    scene: SceneData,
    strokes: ContextSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Pushed,
    /// Identical to the current top; discarded.
    Duplicate,
    /// A restore is in flight; nothing recorded.
    Locked,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    /// The scene load started; completion is reported with this ticket.
    Started(LoadTicket),
    /// Nothing to undo or redo.
    Nothing,
    /// Another restore is still in flight.
    Locked,
    /// The target snapshot could not be restored. Stacks are unchanged.
    Failed(HistoryError),
}

/// Metadata waiting for its scene load to finish.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRestore {
    pub ticket: LoadTicket,
    pub context: ImageContext,
    pub strokes: ContextSnapshot,
}

#[derive(Debug)]
enum LockState {
    Idle,
    Restoring {
        ticket: LoadTicket,
        context: ImageContext,
        deadline: Instant,
        /// Taken once the load completes; the lock stays until `unlock`.
        strokes: Option<ContextSnapshot>,
    },
}

/// Bounded undo/redo stacks with a restore lock.
#[derive(Debug)]
pub struct History {
    undo_stack: Vec<Snapshot>,
    redo_stack: Vec<Snapshot>,
    /// Maximum undo depth.
    max_depth: usize,
    restore_timeout: Duration,
    lock: LockState,
}

impl History {
    pub fn new(max_depth: usize, restore_timeout: Duration) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
            restore_timeout,
            lock: LockState::Idle,
        }
    }

    // ─── Capture ─────────────────────────────────────────────────────────

    /// Record the current state of `context`.
    ///
    /// # Errors
    /// Fails when the scene cannot be exported or encoded. The stacks are
    /// untouched in that case.
    pub fn capture<S: Surface + ?Sized>(
        &mut self,
        context: ImageContext,
        surface: &S,
        store: &StrokeStore,
    ) -> Result<CaptureOutcome, HistoryError> {
        if self.is_locked() {
            log::debug!("capture skipped: restore in progress");
            return Ok(CaptureOutcome::Locked);
        }

        let body = SnapshotBody {
            scene: surface.export_scene(context)?,
            strokes: store.snapshot_context(context),
        };
        let snapshot = Snapshot {
            context,
            taken_at: Utc::now(),
            body: rmp_serde::to_vec(&body)?,
        };
        Ok(self.push(snapshot))
    }

    /// Push a snapshot, collapsing it into the top when identical.
    pub fn push(&mut self, snapshot: Snapshot) -> CaptureOutcome {
        if self
            .undo_stack
            .last()
            .is_some_and(|top| top.context == snapshot.context && top.body == snapshot.body)
        {
            log::trace!("capture skipped: identical to top");
            return CaptureOutcome::Duplicate;
        }

        self.undo_stack.push(snapshot);
        if self.undo_stack.len() > self.max_depth {
            self.undo_stack.remove(0);
        }
        self.redo_stack.clear();
        log::debug!("captured snapshot ({} on undo stack)", self.undo_stack.len());
        CaptureOutcome::Pushed
    }

    // ─── Undo / redo ─────────────────────────────────────────────────────

    /// Step back one snapshot. The initial snapshot is never popped.
    pub fn undo<S: Surface + ?Sized>(&mut self, surface: &mut S) -> RestoreOutcome {
        if self.is_locked() {
            return RestoreOutcome::Locked;
        }
        if self.undo_stack.len() < 2 {
            return RestoreOutcome::Nothing;
        }

        let target = &self.undo_stack[self.undo_stack.len() - 2];
        let (ticket, pending) = match begin_load(surface, target) {
            Ok(started) => started,
            Err(err) => {
                log::warn!("undo failed: {err}");
                return RestoreOutcome::Failed(err);
            }
        };
        let context = target.context;

        if let Some(top) = self.undo_stack.pop() {
            self.redo_stack.push(top);
        }
        self.lock(ticket, context, pending);
        log::debug!("undo started ({ticket:?})");
        RestoreOutcome::Started(ticket)
    }

    pub fn redo<S: Surface + ?Sized>(&mut self, surface: &mut S) -> RestoreOutcome {
        if self.is_locked() {
            return RestoreOutcome::Locked;
        }
        let Some(target) = self.redo_stack.last() else {
            return RestoreOutcome::Nothing;
        };

        let (ticket, pending) = match begin_load(surface, target) {
            Ok(started) => started,
            Err(err) => {
                log::warn!("redo failed: {err}");
                return RestoreOutcome::Failed(err);
            }
        };
        let context = target.context;

        if let Some(snapshot) = self.redo_stack.pop() {
            self.undo_stack.push(snapshot);
        }
        self.lock(ticket, context, pending);
        log::debug!("redo started ({ticket:?})");
        RestoreOutcome::Started(ticket)
    }

    fn lock(&mut self, ticket: LoadTicket, context: ImageContext, strokes: ContextSnapshot) {
        self.lock = LockState::Restoring {
            ticket,
            context,
            deadline: Instant::now() + self.restore_timeout,
            strokes: Some(strokes),
        };
    }

    // ─── Restore completion ──────────────────────────────────────────────

    /// The scene load for `ticket` finished. Hands back the metadata to
    /// apply; the lock stays held until `unlock`. Unknown or stale tickets
    /// give `None`.
    pub fn finish_restore(&mut self, ticket: LoadTicket) -> Option<PendingRestore> {
        match &mut self.lock {
            LockState::Restoring {
                ticket: current,
                context,
                strokes,
                ..
            } if *current == ticket => strokes.take().map(|strokes| PendingRestore {
                ticket,
                context: *context,
                strokes,
            }),
            _ => None,
        }
    }

    pub fn unlock(&mut self) {
        if let LockState::Restoring { ticket, .. } = self.lock {
            log::debug!("restore {ticket:?} complete, history unlocked");
        }
        self.lock = LockState::Idle;
    }

    /// Release a restore that outlived its deadline. Returns its metadata
    /// if it was never applied.
    pub fn expire(&mut self, now: Instant) -> Option<PendingRestore> {
        let LockState::Restoring {
            ticket,
            context,
            deadline,
            strokes,
        } = &mut self.lock
        else {
            return None;
        };
        if now < *deadline {
            return None;
        }
        log::warn!("restore {ticket:?} timed out, releasing history lock");
        let pending = strokes.take().map(|strokes| PendingRestore {
            ticket: *ticket,
            context: *context,
            strokes,
        });
        self.lock = LockState::Idle;
        pending
    }

    // ─── State ───────────────────────────────────────────────────────────

    pub fn is_locked(&self) -> bool {
        matches!(self.lock, LockState::Restoring { .. })
    }

    pub fn restoring(&self) -> Option<LoadTicket> {
        match self.lock {
            LockState::Restoring { ticket, .. } => Some(ticket),
            LockState::Idle => None,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.len() >= 2
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_stack(&self) -> &[Snapshot] {
        &self.undo_stack
    }

    pub fn redo_stack(&self) -> &[Snapshot] {
        &self.redo_stack
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Drop both stacks. A pending restore keeps its lock.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

fn begin_load<S: Surface + ?Sized>(
    surface: &mut S,
    target: &Snapshot,
) -> Result<(LoadTicket, ContextSnapshot), HistoryError> {
    let body = target.decode()?;
    let ticket = surface.load_scene(target.context, &body.scene)?;
    Ok((ticket, body.strokes))
}
