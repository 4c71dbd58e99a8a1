use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Handle of an entry in a [`TimeoutList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// Per worker list of pending timers ordered by absolute deadline.
///
/// Entries with the same deadline expire in insertion order.
pub struct TimeoutList<T> {
    // (deadline, seq) -> data, seq doubles as the token
    entries: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
    seq: u64,
}

impl<T> Default for TimeoutList<T> {
    fn default() -> Self {
        TimeoutList::new()
    }
}

impl<T> TimeoutList<T> {
    pub fn new() -> Self {
        TimeoutList {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            seq: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_timer(&mut self, deadline: Instant, data: T) -> TimerToken {
        let seq = self.seq;
        self.seq += 1;
        self.entries.insert((deadline, seq), data);
        self.deadlines.insert(seq, deadline);
        TimerToken(seq)
    }

    /// remove a pending timer, `None` if it already expired or was removed
    pub fn remove_timer(&mut self, token: TimerToken) -> Option<T> {
        let deadline = self.deadlines.remove(&token.0)?;
        self.entries.remove(&(deadline, token.0))
    }

    /// move a pending timer to a new deadline, keeps its token
    pub fn update_timer(&mut self, token: TimerToken, deadline: Instant) -> bool {
        let old = match self.deadlines.get_mut(&token.0) {
            Some(d) => std::mem::replace(d, deadline),
            None => return false,
        };
        match self.entries.remove(&(old, token.0)) {
            Some(data) => {
                self.entries.insert((deadline, token.0), data);
                true
            }
            None => unreachable!("timer index out of sync"),
        }
    }

    #[inline]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// time left until the first deadline, zero if it already passed
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// take out every entry whose deadline is not after `now`, in deadline order
    pub fn expire(&mut self, now: Instant) -> Vec<T> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, seq), data) = entry.remove_entry();
            self.deadlines.remove(&seq);
            expired.push(data);
        }
        expired
    }

    /// drop every pending timer
    pub fn clear(&mut self) -> Vec<T> {
        self.deadlines.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}
