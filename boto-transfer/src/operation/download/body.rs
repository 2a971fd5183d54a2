/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::service::StagedPart;

/// Reorders staged parts that complete in any order into ascending part index order.
#[derive(Debug)]
pub(super) struct Sequencer {
    /// next expected part index
    next_seq: u64,
    parts: BinaryHeap<cmp::Reverse<SequencedPart>>,
}

impl Sequencer {
    pub(super) fn new() -> Self {
        Self {
            parts: BinaryHeap::with_capacity(8),
            next_seq: 0,
        }
    }

    pub(super) fn push(&mut self, part: StagedPart) {
        self.parts.push(cmp::Reverse(SequencedPart(part)))
    }

    /// Pop the next part in order, if it has arrived
    pub(super) fn pop_next(&mut self) -> Option<StagedPart> {
        if !self.is_ordered() {
            return None;
        }
        let part = self.parts.pop().map(|p| p.0 .0);
        self.advance();
        part
    }

    /// Number of parts held back waiting for an earlier one
    pub(super) fn pending(&self) -> usize {
        self.parts.len()
    }

    fn is_ordered(&self) -> bool {
        self.peek().is_some_and(|part| part.index == self.next_seq)
    }

    fn peek(&self) -> Option<&StagedPart> {
        self.parts.peek().map(|p| &p.0 .0)
    }

    fn advance(&mut self) {
        self.next_seq += 1
    }
}

#[derive(Debug)]
struct SequencedPart(StagedPart);

impl Ord for SequencedPart {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.index.cmp(&other.0.index)
    }
}

impl PartialOrd for SequencedPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for SequencedPart {}
impl PartialEq for SequencedPart {
    fn eq(&self, other: &Self) -> bool {
        self.0.index == other.0.index
    }
}

#[cfg(test)]
mod tests {
    use super::Sequencer;
    use crate::operation::download::service::StagedPart;

    fn staged(index: u64) -> StagedPart {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        StagedPart {
            index,
            size: 0,
            path,
        }
    }

    #[test]
    fn test_sequencer() {
        let mut sequencer = Sequencer::new();
        sequencer.push(staged(1));
        sequencer.push(staged(2));
        assert!(sequencer.pop_next().is_none());
        assert_eq!(2, sequencer.pending());

        sequencer.push(staged(0));
        let order: Vec<u64> = std::iter::from_fn(|| sequencer.pop_next())
            .map(|part| part.index)
            .collect();
        assert_eq!(vec![0, 1, 2], order);
        assert_eq!(0, sequencer.pending());
    }

    #[test]
    fn test_dropping_staged_parts_deletes_files() {
        let mut sequencer = Sequencer::new();
        let part = staged(3);
        let path = part.path.to_path_buf();
        sequencer.push(part);
        assert!(path.exists());
        drop(sequencer);
        assert!(!path.exists());
    }
}
