//! Priority and boost policy

use strand_api::{ThreadId, Ticks, MAX_PRIORITY};

/// Scheduling attributes of one ready thread, as seen by the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: ThreadId,
    pub priority: u8,
    pub boost: u8,
    pub max_boost: u8,
    pub ready_since: Ticks,
}

/// Priority a candidate competes with at `now`
///
/// The boost only counts once the thread has waited a full quantum, is capped
/// by the thread's maximum boost, and the sum never exceeds [`MAX_PRIORITY`].
pub fn effective_priority(candidate: &Candidate, now: Ticks, quantum: Ticks) -> u8 {
    let waited = now.saturating_sub(candidate.ready_since);
    if waited < quantum || quantum == 0 {
        return candidate.priority;
    }
    let boost = candidate.boost.min(candidate.max_boost);
    candidate.priority.saturating_add(boost).min(MAX_PRIORITY)
}

/// Picks the candidate with the highest effective priority
///
/// Candidates must be given in ready-list order; the first of several equal
/// candidates wins, which makes equal priorities round-robin.
pub fn select<I>(candidates: I, now: Ticks, quantum: Ticks) -> Option<ThreadId>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut best: Option<(u8, ThreadId)> = None;
    for candidate in candidates {
        let priority = effective_priority(&candidate, now, quantum);
        match best {
            Some((top, _)) if priority <= top => {}
            _ => best = Some((priority, candidate.id)),
        }
    }
    best.map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u8, priority: u8, boost: u8, ready_since: Ticks) -> Candidate {
        Candidate {
            id: ThreadId(id),
            priority,
            boost,
            max_boost: 8,
            ready_since,
        }
    }

    #[test]
    fn test_boost_needs_full_quantum() {
        let c = candidate(1, 7, 5, 100);
        assert_eq!(effective_priority(&c, 119, 20), 7);
        assert_eq!(effective_priority(&c, 120, 20), 12);
    }

    #[test]
    fn test_boost_capped() {
        let mut c = candidate(1, 12, 9, 0);
        assert_eq!(effective_priority(&c, 1_000, 20), MAX_PRIORITY);
        c.priority = 3;
        c.max_boost = 2;
        assert_eq!(effective_priority(&c, 1_000, 20), 5);
    }

    #[test]
    fn test_fifo_among_equals() {
        let picked = select(
            [candidate(4, 7, 0, 0), candidate(2, 7, 0, 0), candidate(9, 7, 0, 0)],
            10,
            20,
        );
        assert_eq!(picked, Some(ThreadId(4)));
    }

    #[test]
    fn test_highest_priority_wins() {
        let picked = select(
            [candidate(4, 3, 0, 0), candidate(2, 9, 0, 0), candidate(9, 8, 0, 0)],
            10,
            20,
        );
        assert_eq!(picked, Some(ThreadId(2)));
    }

    #[test]
    fn test_waiting_thread_overtakes() {
        // Thread 5 has waited two quanta; its boost lifts it above thread 6.
        let picked = select([candidate(6, 9, 0, 90), candidate(5, 7, 5, 60)], 100, 20);
        assert_eq!(picked, Some(ThreadId(5)));
    }

    #[test]
    fn test_empty() {
        assert_eq!(select(core::iter::empty(), 0, 20), None);
    }
}
