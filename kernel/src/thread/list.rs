//! Index-linked thread lists
//!
//! Threads live in a fixed slot table indexed by [`ThreadId`]; a list only
//! stores the links between slot indices. Every list owns its own link array,
//! so one thread can be a member of several lists at once without any shared
//! mutable state, and insert/remove stay O(1).

use strand_api::{ThreadId, MAX_THREADS};

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: Option<ThreadId>,
    next: Option<ThreadId>,
    linked: bool,
}

impl Link {
    const UNLINKED: Link = Link {
        prev: None,
        next: None,
        linked: false,
    };
}

/// Doubly linked list of thread identifiers
#[derive(Debug, Clone)]
pub struct ThreadList {
    links: [Link; MAX_THREADS],
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    len: usize,
}

impl Default for ThreadList {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadList {
    /// Creates an empty list
    pub const fn new() -> Self {
        Self {
            links: [Link::UNLINKED; MAX_THREADS],
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of members
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `id` is a member
    #[inline]
    pub fn contains(&self, id: ThreadId) -> bool {
        self.links[id.index()].linked
    }

    /// First member
    #[inline]
    pub fn head(&self) -> Option<ThreadId> {
        self.head
    }

    /// Member following `id`, `None` at the tail or if `id` is not linked
    #[inline]
    pub fn next(&self, id: ThreadId) -> Option<ThreadId> {
        self.links[id.index()].next
    }

    /// Appends `id`; returns false if it was already a member
    pub fn push_back(&mut self, id: ThreadId) -> bool {
        if self.contains(id) {
            return false;
        }

        self.links[id.index()] = Link {
            prev: self.tail,
            next: None,
            linked: true,
        };
        match self.tail {
            Some(tail) => self.links[tail.index()].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        true
    }

    /// Unlinks `id`; returns false if it was not a member
    pub fn remove(&mut self, id: ThreadId) -> bool {
        if !self.contains(id) {
            return false;
        }

        let Link { prev, next, .. } = self.links[id.index()];
        match prev {
            Some(prev) => self.links[prev.index()].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.links[next.index()].prev = prev,
            None => self.tail = prev,
        }
        self.links[id.index()] = Link::UNLINKED;
        self.len -= 1;
        true
    }

    /// Removes and returns the first member
    pub fn pop_front(&mut self) -> Option<ThreadId> {
        let head = self.head?;
        self.remove(head);
        Some(head)
    }

    /// Members from head to tail
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

/// Iterator over a [`ThreadList`]
pub struct Iter<'a> {
    list: &'a ThreadList,
    cursor: Option<ThreadId>,
}

impl Iterator for Iter<'_> {
    type Item = ThreadId;

    fn next(&mut self) -> Option<ThreadId> {
        let id = self.cursor?;
        self.cursor = self.list.next(id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn ids(list: &ThreadList) -> Vec<u8> {
        list.iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut list = ThreadList::new();
        for id in [4, 9, 2] {
            assert!(list.push_back(ThreadId(id)));
        }
        assert_eq!(ids(&list), [4, 9, 2]);
        assert_eq!(list.pop_front(), Some(ThreadId(4)));
        assert_eq!(ids(&list), [9, 2]);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut list = ThreadList::new();
        for id in 0..5 {
            list.push_back(ThreadId(id));
        }
        assert!(list.remove(ThreadId(0)));
        assert!(list.remove(ThreadId(2)));
        assert!(list.remove(ThreadId(4)));
        assert_eq!(ids(&list), [1, 3]);
        assert_eq!(list.len(), 2);

        assert!(!list.remove(ThreadId(2)), "second removal is a no-op");
        list.push_back(ThreadId(0));
        assert_eq!(ids(&list), [1, 3, 0]);
    }

    #[test]
    fn test_duplicate_push_rejected() {
        let mut list = ThreadList::new();
        assert!(list.push_back(ThreadId(255)));
        assert!(!list.push_back(ThreadId(255)));
        assert_eq!(list.len(), 1);
        assert!(list.contains(ThreadId(255)));
    }

    #[test]
    fn test_drain_to_empty() {
        let mut list = ThreadList::new();
        list.push_back(ThreadId(1));
        list.push_back(ThreadId(2));
        while list.pop_front().is_some() {}
        assert!(list.is_empty());
        assert_eq!(list.head(), None);
        list.push_back(ThreadId(7));
        assert_eq!(ids(&list), [7]);
    }
}
