/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::atomic::{AtomicU64, Ordering};

/// Units of measurement
pub mod unit {
    use std::fmt;

    /// Binary byte units
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ByteUnit {
        /// 1 byte
        Byte,
        /// 2<sup>10</sup> bytes.
        Kibibyte,
        /// 2<sup>20</sup> bytes.
        Mebibyte,
        /// 2<sup>30</sup> bytes.
        Gibibyte,
    }

    impl ByteUnit {
        /// The number of bytes represented by this unit
        pub const fn as_bytes_u64(&self) -> u64 {
            match self {
                ByteUnit::Byte => 1,
                ByteUnit::Kibibyte => 1 << 10,
                ByteUnit::Mebibyte => 1 << 20,
                ByteUnit::Gibibyte => 1 << 30,
            }
        }

        /// The number of bytes represented by this unit
        pub const fn as_bytes_usize(&self) -> usize {
            self.as_bytes_u64() as usize
        }

        /// Convert some number of bytes into this unit as an `f64`
        pub fn convert(&self, bytes: u64) -> f64 {
            bytes as f64 / self.as_bytes_u64() as f64
        }

        /// Pick the largest unit not bigger than `total_bytes` to display it with
        pub fn display(total_bytes: u64) -> ByteCountDisplayContext {
            let unit = [ByteUnit::Gibibyte, ByteUnit::Mebibyte, ByteUnit::Kibibyte]
                .into_iter()
                .find(|u| total_bytes >= u.as_bytes_u64())
                .unwrap_or(ByteUnit::Byte);
            ByteCountDisplayContext { total_bytes, unit }
        }

        const fn as_str(&self) -> &'static str {
            match self {
                ByteUnit::Byte => "B",
                ByteUnit::Kibibyte => "KiB",
                ByteUnit::Mebibyte => "MiB",
                ByteUnit::Gibibyte => "GiB",
            }
        }
    }

    /// Formats a byte count in a particular unit
    #[derive(Debug)]
    pub struct ByteCountDisplayContext {
        total_bytes: u64,
        unit: ByteUnit,
    }

    impl fmt::Display for ByteCountDisplayContext {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.total_bytes % self.unit.as_bytes_u64() == 0 {
                let converted = self.total_bytes / self.unit.as_bytes_u64();
                return write!(f, "{converted} {}", self.unit.as_str());
            }
            let precision = f.precision().unwrap_or(3);
            write!(
                f,
                "{:.*} {}",
                precision,
                self.unit.convert(self.total_bytes),
                self.unit.as_str()
            )
        }
    }
}

/// Transfer counters aggregated over the lifetime of a [`Client`](crate::Client).
#[derive(Debug, Default)]
pub struct TransferMetrics {
    initiated: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl TransferMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of transfers started
    pub fn transfers_initiated(&self) -> u64 {
        self.initiated.load(Ordering::Relaxed)
    }

    /// Number of transfers that completed successfully
    pub fn transfers_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Number of transfers that failed
    pub fn transfers_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Bytes moved by completed transfers
    pub fn total_bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_initiated(&self) {
        self.initiated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome<T, E>(&self, result: &Result<T, E>, bytes: u64) {
        match result {
            Ok(_) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
