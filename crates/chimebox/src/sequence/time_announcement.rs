//! Spoken time announcement ending on a tone.
//!
//! A trigger at 12:04:57 plays "at the next tone it is", "12 hours",
//! "5 minutes", "10 seconds", waits until 12:05:10 and then plays the tone.
//!
//! Clips are matched by file name suffix:
//!
//! | suffix                    | meaning                   |
//! |---------------------------|---------------------------|
//! | `000.mp3` .. `059.mp3`    | minute 0-59               |
//! | `060.mp3` .. `065.mp3`    | second 0, 10, .. 50       |
//! | `100.mp3` .. `123.mp3`    | hour 0-23                 |
//! | `201BeimNaechstenTon.mp3` | lead-in                   |
//! | `202Piep880Hz300ms.mp3`   | tone                      |

use async_stream::stream;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, Timelike};
use futures::stream::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};

use super::{ClipSequence, SequenceProvider};
use crate::error::{ChimeError, Result};
use crate::types::ClipId;

/// Longest expected speech before the tone, in seconds.
pub const LEAD_BUFFER_SECS: i64 = 6;

const LEAD_IN_SUFFIX: &str = "201BeimNaechstenTon.mp3";
const TONE_SUFFIX: &str = "202Piep880Hz300ms.mp3";

/// Wall clock used to align announcements.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// The 10-second boundary the tone lands on.
///
/// Always strictly after `now` plus the lead buffer; an exact boundary moves
/// on to the next one.
pub fn announcement_target(now: NaiveDateTime) -> NaiveDateTime {
    let ahead = now + ChronoDuration::seconds(LEAD_BUFFER_SECS);
    let ahead = ahead.with_nanosecond(0).unwrap_or(ahead);
    ahead + ChronoDuration::seconds(10 - i64::from(ahead.second() % 10))
}

#[derive(Debug, Clone)]
struct ClipTables {
    minutes: Vec<ClipId>,
    intervals: Vec<ClipId>,
    hours: Vec<ClipId>,
    lead_in: ClipId,
    tone: ClipId,
}

impl ClipTables {
    fn index(clips: &[ClipId]) -> Result<Self> {
        let find = |suffix: &str| {
            clips
                .iter()
                .find(|clip| clip.as_str().ends_with(suffix))
                .cloned()
                .ok_or_else(|| {
                    ChimeError::Configuration(format!(
                        "time announcement clip ending in {suffix} is missing"
                    ))
                })
        };
        let numbered = |range: std::ops::RangeInclusive<u32>| {
            range
                .map(|n| find(&format!("{n:03}.mp3")))
                .collect::<Result<Vec<_>>>()
        };

        Ok(Self {
            minutes: numbered(0..=59)?,
            intervals: numbered(60..=65)?,
            hours: numbered(100..=123)?,
            lead_in: find(LEAD_IN_SUFFIX)?,
            tone: find(TONE_SUFFIX)?,
        })
    }
}

/// Announces the upcoming 10-second boundary, then sounds the tone on it.
pub struct TimeAnnouncement {
    clock: Arc<dyn Clock>,
    tables: Mutex<Option<ClipTables>>,
}

impl TimeAnnouncement {
    pub const NAME: &'static str = "Zeitansage";

    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(None),
        }
    }
}

impl SequenceProvider for TimeAnnouncement {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// A listing missing any expected clip leaves the previous tables in place.
    fn set_clips(&self, clips: &[ClipId]) -> Result<()> {
        if clips.is_empty() {
            return Err(ChimeError::EmptyPool);
        }
        let tables = ClipTables::index(clips)?;
        *self.tables.lock().unwrap_or_else(PoisonError::into_inner) = Some(tables);
        Ok(())
    }

    fn next_sequence(&self) -> Result<ClipSequence> {
        let tables = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ChimeError::EmptyPool)?;
        let clock = self.clock.clone();

        let sequence = stream! {
            let target = announcement_target(clock.now());
            tracing::debug!(tone_at = %target, "announcing time");

            yield tables.lead_in.clone();
            yield tables.hours[target.hour() as usize].clone();
            yield tables.minutes[target.minute() as usize].clone();
            yield tables.intervals[(target.second() / 10) as usize].clone();

            if let Ok(wait) = (target - clock.now()).to_std() {
                tokio::time::sleep(wait).await;
            }

            yield tables.tone.clone();
        };

        Ok(sequence.boxed())
    }
}
