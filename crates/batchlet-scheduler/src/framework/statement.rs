//! Transactional statements over a session
//!
//! A statement buffers tentative operations. Each operation takes effect on
//! the session state immediately, so later decisions in the same statement
//! see it, but nothing reaches the cache until `commit`. `discard` replays
//! the exact inverses in LIFO order.

use tracing::debug;

use batchlet_core::{BatchletResult, TaskInfo};

use super::session::Session;

/// A buffered, reversible session operation.
///
/// Both the post-operation task and the pre-operation original are kept;
/// the inverse restores the original verbatim.
pub(crate) enum Operation {
    Allocate { task: TaskInfo, original: TaskInfo },
    Pipeline { task: TaskInfo, original: TaskInfo },
    Evict {
        task: TaskInfo,
        original: TaskInfo,
        reason: String,
    },
}

/// An in-session transactional buffer of tentative operations
pub struct Statement<'a> {
    session: &'a mut Session,
    operations: Vec<Operation>,
}

impl<'a> Statement<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self {
            session,
            operations: Vec::new(),
        }
    }

    /// Read access to the session, reflecting every buffered operation
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Tentatively place a pending task on a node
    pub fn allocate(
        &mut self,
        task: &TaskInfo,
        node_name: &str,
        backfill: bool,
    ) -> BatchletResult<()> {
        let (task, original) = self.session.do_allocate(task, node_name, backfill, false)?;
        debug!(task = %task.key(), node = node_name, backfill, "Allocated");
        self.operations.push(Operation::Allocate { task, original });
        Ok(())
    }

    /// Tentatively reserve a releasing slot on a node for a pending task
    pub fn pipeline(&mut self, task: &TaskInfo, node_name: &str) -> BatchletResult<()> {
        let (task, original) = self.session.do_allocate(task, node_name, false, true)?;
        debug!(task = %task.key(), node = node_name, "Pipelined");
        self.operations.push(Operation::Pipeline { task, original });
        Ok(())
    }

    /// Tentatively mark a placed task as releasing
    pub fn evict(&mut self, task: &TaskInfo, reason: &str) -> BatchletResult<()> {
        let (task, original) = self.session.do_evict(&task.job, &task.id)?;
        debug!(task = %task.key(), reason, "Evicted");
        self.operations.push(Operation::Evict {
            task,
            original,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Number of buffered operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the statement has buffered anything
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Enqueue every buffered operation for cache commit at session close
    pub fn commit(self) {
        let Statement {
            session,
            operations,
        } = self;
        debug!(operations = operations.len(), "Statement committed");
        session.push_committed(operations);
    }

    /// Reverse every buffered operation in LIFO order
    pub fn discard(self) {
        let Statement {
            session,
            mut operations,
        } = self;
        debug!(operations = operations.len(), "Statement discarded");
        while let Some(op) = operations.pop() {
            match op {
                Operation::Allocate { task, original } | Operation::Pipeline { task, original } => {
                    session.undo_allocate(&task, &original);
                }
                Operation::Evict { original, .. } => {
                    session.undo_evict(&original);
                }
            }
        }
    }
}
