use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Granted,
    Queued,
}

/// Counting semaphore with a FIFO wait list. Slots are handed over on release, so a woken
/// actor already holds its slot.
#[derive(Debug, Clone)]
pub struct Resource {
    capacity: usize,
    holders: Vec<usize>,
    waiting: VecDeque<usize>,
}

impl Resource {
    pub fn new(capacity: usize) -> Self {
        Resource { capacity: capacity.max(1), holders: Vec::new(), waiting: VecDeque::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn request(&mut self, actor: usize) -> Request {
        if self.holders.contains(&actor) {
            return Request::Granted;
        }
        if self.waiting.contains(&actor) {
            return Request::Queued;
        }
        if self.holders.len() < self.capacity {
            self.holders.push(actor);
            Request::Granted
        } else {
            self.waiting.push_back(actor);
            Request::Queued
        }
    }

    /// Frees the actor's slot and returns the actor it was handed to, if any.
    pub fn release(&mut self, actor: usize) -> Option<usize> {
        let pos = self.holders.iter().position(|a| *a == actor)?;
        self.holders.remove(pos);
        let next = self.waiting.pop_front()?;
        self.holders.push(next);
        Some(next)
    }

    /// Withdraws a queued request. Returns false when the actor was not waiting.
    pub fn cancel(&mut self, actor: usize) -> bool {
        match self.waiting.iter().position(|a| *a == actor) {
            Some(pos) => {
                self.waiting.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_holding(&self, actor: usize) -> bool {
        self.holders.contains(&actor)
    }

    pub fn holders(&self) -> &[usize] {
        &self.holders
    }

    pub fn waiting(&self) -> impl Iterator<Item = &usize> {
        self.waiting.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let mut r = Resource::new(1);
        assert_eq!(r.request(0), Request::Granted);
        assert_eq!(r.request(1), Request::Queued);
        assert_eq!(r.request(2), Request::Queued);
        assert_eq!(r.release(0), Some(1));
        assert!(r.is_holding(1));
        assert_eq!(r.release(1), Some(2));
        assert_eq!(r.release(2), None);
        assert!(r.holders().is_empty());
    }

    #[test]
    fn cancel_skips_the_actor() {
        let mut r = Resource::new(1);
        r.request(0);
        r.request(1);
        r.request(2);
        assert!(r.cancel(1));
        assert!(!r.cancel(1));
        assert_eq!(r.release(0), Some(2));
    }

    #[test]
    fn capacity_bounds_holders() {
        let mut r = Resource::new(2);
        assert_eq!(r.request(0), Request::Granted);
        assert_eq!(r.request(1), Request::Granted);
        assert_eq!(r.request(2), Request::Queued);
        assert_eq!(r.holders().len(), 2);
        assert_eq!(r.waiting().count(), 1);
        // a repeated request does not queue twice
        assert_eq!(r.request(2), Request::Queued);
        assert_eq!(r.waiting().count(), 1);
    }
}
