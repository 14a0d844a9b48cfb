//! Shuffled queue: every clip plays once before any clip repeats.

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::{ClipSequence, SequenceProvider};
use crate::error::{ChimeError, Result};
use crate::types::ClipId;

#[derive(Debug, Default)]
struct QueueState {
    all: Vec<ClipId>,
    remaining: VecDeque<ClipId>,
    last: Option<ClipId>,
}

impl QueueState {
    fn reshuffle(&mut self) {
        let mut order = self.all.clone();
        order.shuffle(&mut rand::rng());

        // keep the clip just played from opening the new round
        if order.len() > 1 && order.first() == self.last.as_ref() {
            let end = order.len() - 1;
            order.swap(0, end);
        }

        self.remaining = order.into();
    }
}

/// Yields one clip per trigger from a reshuffled queue.
#[derive(Debug, Default)]
pub struct QueueRandom {
    state: Mutex<QueueState>,
}

impl QueueRandom {
    pub const NAME: &'static str = "QueueRandom";

    pub fn new() -> Self {
        Self::default()
    }

    /// Clips left before the next reshuffle.
    pub fn remaining(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
            .len()
    }
}

impl SequenceProvider for QueueRandom {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Clips still queued survive a refresh if they are still listed, so a
    /// refresh does not restart the round.
    fn set_clips(&self, clips: &[ClipId]) -> Result<()> {
        if clips.is_empty() {
            return Err(ChimeError::EmptyPool);
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let listed: HashSet<&ClipId> = clips.iter().collect();
        state.remaining.retain(|clip| listed.contains(clip));
        state.all = clips.to_vec();
        Ok(())
    }

    fn next_sequence(&self) -> Result<ClipSequence> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.all.is_empty() {
            return Err(ChimeError::EmptyPool);
        }
        if state.remaining.is_empty() {
            state.reshuffle();
        }

        let clip = state.remaining.pop_front().ok_or(ChimeError::EmptyPool)?;
        state.last = Some(clip.clone());
        Ok(stream::iter([clip]).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(n: usize) -> Vec<ClipId> {
        (0..n).map(|i| ClipId::new(format!("clip-{i}.mp3"))).collect()
    }

    async fn next(provider: &QueueRandom) -> Vec<ClipId> {
        provider.next_sequence().unwrap().collect().await
    }

    #[tokio::test]
    async fn test_each_clip_once_per_round() {
        let provider = QueueRandom::new();
        let clips = ids(7);
        provider.set_clips(&clips).unwrap();

        for _ in 0..3 {
            let mut round = Vec::new();
            for _ in 0..clips.len() {
                let sequence = next(&provider).await;
                assert_eq!(sequence.len(), 1);
                round.extend(sequence);
            }
            round.sort();
            assert_eq!(round, clips);
        }
    }

    #[tokio::test]
    async fn test_no_repeat_across_reshuffle() {
        let provider = QueueRandom::new();
        provider.set_clips(&ids(2)).unwrap();

        let mut previous = next(&provider).await;
        for _ in 0..50 {
            let current = next(&provider).await;
            assert_ne!(current, previous);
            previous = current;
        }
    }

    #[tokio::test]
    async fn test_single_clip_repeats() {
        let provider = QueueRandom::new();
        provider.set_clips(&ids(1)).unwrap();

        assert_eq!(next(&provider).await, ids(1));
        assert_eq!(next(&provider).await, ids(1));
    }

    #[test]
    fn test_empty_list_rejected() {
        let provider = QueueRandom::new();
        assert!(matches!(provider.set_clips(&[]), Err(ChimeError::EmptyPool)));
        assert!(matches!(provider.next_sequence(), Err(ChimeError::EmptyPool)));
    }

    #[tokio::test]
    async fn test_refresh_keeps_listed_remaining_clips() {
        let provider = QueueRandom::new();
        let clips = ids(4);
        provider.set_clips(&clips).unwrap();
        let first = next(&provider).await;
        assert_eq!(provider.remaining(), 3);

        // drop one clip that may still be queued
        let kept: Vec<ClipId> = clips.iter().filter(|c| **c != clips[3]).cloned().collect();
        provider.set_clips(&kept).unwrap();

        let mut rest = Vec::new();
        while provider.remaining() > 0 {
            rest.extend(next(&provider).await);
        }
        assert!(!rest.contains(&clips[3]));
        assert!(!rest.contains(&first[0]));
    }
}
