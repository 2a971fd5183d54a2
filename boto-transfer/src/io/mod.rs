/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Tracker files persisting resumption tokens across processes
pub mod tracker;

/// Progress callbacks
pub mod progress;

/// Upload sources and the byte accounting body streamed from them
pub mod source;

// re-exports
pub use self::progress::ProgressReporter;
pub use self::source::InputSource;
pub use self::tracker::TrackerFile;
