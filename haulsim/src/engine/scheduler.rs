use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Wake-up times of the truck main processes. Entries at the same second come out in the
/// order they were scheduled. Rescheduling an actor supersedes its earlier entry.
#[derive(Debug, Clone, Default)]
pub struct WakeQueue {
    heap: BinaryHeap<Reverse<(u64, u64, usize, u64)>>,
    seq: u64,
    generation: Vec<u64>,
}

impl WakeQueue {
    pub fn new(actors: usize) -> Self {
        WakeQueue { heap: BinaryHeap::new(), seq: 0, generation: vec![0; actors] }
    }

    fn bump(&mut self, actor: usize) -> u64 {
        if actor >= self.generation.len() {
            self.generation.resize(actor + 1, 0);
        }
        self.generation[actor] += 1;
        self.generation[actor]
    }

    pub fn schedule(&mut self, at: u64, actor: usize) {
        let generation = self.bump(actor);
        self.seq += 1;
        self.heap.push(Reverse((at, self.seq, actor, generation)));
    }

    /// Drops any pending wake-up of the actor. It sleeps until scheduled again.
    pub fn cancel(&mut self, actor: usize) {
        self.bump(actor);
    }

    fn is_live(&self, actor: usize, generation: u64) -> bool {
        self.generation.get(actor) == Some(&generation)
    }

    /// The next actor due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<usize> {
        while let Some(Reverse((at, _, actor, generation))) = self.heap.peek().copied() {
            if !self.is_live(actor, generation) {
                self.heap.pop();
                continue;
            }
            if at > now {
                return None;
            }
            self.heap.pop();
            // consumed, so a later cancel has nothing to drop
            self.bump(actor);
            return Some(actor);
        }
        None
    }

    pub fn next_wake(&self) -> Option<u64> {
        self.heap
            .iter()
            .filter(|Reverse((_, _, actor, generation))| self.is_live(*actor, *generation))
            .map(|Reverse((at, ..))| *at)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_among_equal_times() {
        let mut q = WakeQueue::new(3);
        q.schedule(5, 2);
        q.schedule(5, 0);
        q.schedule(3, 1);
        assert_eq!(q.pop_due(4), Some(1));
        assert_eq!(q.pop_due(4), None);
        assert_eq!(q.pop_due(5), Some(2));
        assert_eq!(q.pop_due(5), Some(0));
        assert_eq!(q.pop_due(100), None);
    }

    #[test]
    fn rescheduling_supersedes() {
        let mut q = WakeQueue::new(1);
        q.schedule(10, 0);
        q.schedule(2, 0);
        assert_eq!(q.next_wake(), Some(2));
        assert_eq!(q.pop_due(2), Some(0));
        assert_eq!(q.pop_due(10), None);
    }

    #[test]
    fn cancel_drops_the_wake() {
        let mut q = WakeQueue::new(2);
        q.schedule(1, 0);
        q.schedule(1, 1);
        q.cancel(0);
        assert_eq!(q.pop_due(1), Some(1));
        assert_eq!(q.pop_due(1), None);
        assert_eq!(q.next_wake(), None);
    }
}
