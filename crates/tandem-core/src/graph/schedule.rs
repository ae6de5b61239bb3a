//! Compiled execution schedule for the patch router.
//!
//! Validation flattens the graph into a list of [`ProcessStep`]s in
//! topological order. Every node writes into its own buffer slot, so a step
//! never reads a buffer that a later step has already overwritten. Running
//! the schedule touches only pre-allocated buffers.

use core::ops::Range;

/// One instruction of the compiled schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStep {
    /// Run a node that has no inbound edge.
    Generate {
        /// Arena index of the node.
        node_idx: usize,
        /// Buffer slot to write into.
        output_buf: usize,
    },
    /// Run a node with exactly one inbound edge.
    Process {
        /// Arena index of the node.
        node_idx: usize,
        /// Buffer slot of the upstream node.
        input_buf: usize,
        /// Buffer slot to write into.
        output_buf: usize,
    },
    /// Sum several upstream buffers into the mix bus, then run the node on it.
    ProcessMixed {
        /// Arena index of the node.
        node_idx: usize,
        /// Range into [`CompiledSchedule::sources`].
        sources: Range<usize>,
        /// Buffer slot to write into.
        output_buf: usize,
    },
    /// Add a sink's buffer into the frame output.
    AccumulateOutput {
        /// Buffer slot to add.
        buffer_idx: usize,
    },
}

/// Immutable compiled snapshot of a validated graph.
#[derive(Debug, Clone, Default)]
pub struct CompiledSchedule {
    pub(crate) steps: Vec<ProcessStep>,
    /// Flattened source buffer lists for `ProcessMixed` steps.
    pub(crate) sources: Vec<usize>,
    pub(crate) buffer_count: usize,
}

impl CompiledSchedule {
    /// Number of processing steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Number of buffer slots the schedule needs.
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// The steps, in execution order.
    pub fn steps(&self) -> &[ProcessStep] {
        &self.steps
    }
}

/// Pool of mono buffers, one per scheduled node.
pub(crate) struct BufferPool {
    buffers: Vec<Vec<f32>>,
    frame_len: usize,
}

impl BufferPool {
    pub fn new(count: usize, frame_len: usize) -> Self {
        Self {
            buffers: (0..count).map(|_| vec![0.0; frame_len]).collect(),
            frame_len,
        }
    }

    pub fn ensure(&mut self, count: usize) {
        let frame_len = self.frame_len;
        if self.buffers.len() < count {
            self.buffers.resize_with(count, || vec![0.0; frame_len]);
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &[f32] {
        &self.buffers[idx]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut [f32] {
        &mut self.buffers[idx]
    }

    /// Borrows one buffer immutably and a different one mutably.
    ///
    /// # Panics
    ///
    /// Panics if `src == dst`.
    #[inline]
    pub fn get_ref_and_mut(&mut self, src: usize, dst: usize) -> (&[f32], &mut [f32]) {
        assert_ne!(src, dst, "source and destination buffers must differ");
        if src < dst {
            let (head, tail) = self.buffers.split_at_mut(dst);
            (&head[src], &mut tail[0])
        } else {
            let (head, tail) = self.buffers.split_at_mut(src);
            (&tail[0], &mut head[dst])
        }
    }

    pub fn clear_all(&mut self) {
        for buf in &mut self.buffers {
            buf.fill(0.0);
        }
    }
}
