/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

/// Default number of times a callback is invoked over the course of a transfer
const DEFAULT_NUM_CB: i32 = 10;

type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

/// Reports `(bytes transferred, total bytes)` to a caller supplied callback.
///
/// The callback is invoked once when sending starts, roughly `num_cb - 2` times while data is
/// flowing and once at the end. A negative `num_cb` reports after every buffer; a value of 2 or
/// less only reports the start and the end.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<ProgressFn>,
    num_cb: i32,
}

impl ProgressReporter {
    /// Create a reporter around `callback`, invoked about 10 times per transfer
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            num_cb: DEFAULT_NUM_CB,
        }
    }

    /// Set how many times the callback should be invoked per transfer
    pub fn num_cb(mut self, num_cb: i32) -> Self {
        self.num_cb = num_cb;
        self
    }

    /// Invoke the callback directly
    pub fn report(&self, transferred: u64, total: u64) {
        (self.callback)(transferred, total)
    }

    /// Start tracking a transfer of `total` bytes moved `buffer_size` bytes at a time
    pub fn tracker(&self, total: u64, buffer_size: usize) -> ProgressTracker {
        let cb_count = if self.num_cb > 2 {
            let buffers = total / buffer_size.max(1) as u64;
            CallbackInterval::Every(buffers / (self.num_cb as u64 - 2))
        } else if self.num_cb < 0 {
            CallbackInterval::EveryBuffer
        } else {
            CallbackInterval::Never
        };
        ProgressTracker {
            reporter: self.clone(),
            total,
            interval: cb_count,
            buffers_since_report: 0,
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("num_cb", &self.num_cb)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackInterval {
    Never,
    EveryBuffer,
    Every(u64),
}

/// Progress state of a single transfer attempt
#[derive(Debug)]
pub struct ProgressTracker {
    reporter: ProgressReporter,
    total: u64,
    interval: CallbackInterval,
    buffers_since_report: u64,
}

impl ProgressTracker {
    /// Report the starting offset
    pub fn start(&mut self, transferred: u64) {
        self.buffers_since_report = 0;
        self.reporter.report(transferred, self.total);
    }

    /// Record one more buffer moved, reporting when the interval is reached
    pub fn on_buffer(&mut self, transferred: u64) {
        self.buffers_since_report += 1;
        let due = match self.interval {
            CallbackInterval::Never => false,
            CallbackInterval::EveryBuffer => true,
            CallbackInterval::Every(n) => self.buffers_since_report == n,
        };
        if due {
            self.reporter.report(transferred, self.total);
            self.buffers_since_report = 0;
        }
    }

    /// Report the final offset
    pub fn finish(&mut self, transferred: u64) {
        self.reporter.report(transferred, self.total);
    }
}
