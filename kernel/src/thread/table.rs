//! Identifier pool and global thread list

use heapless::Deque;
use strand_api::{ThreadId, MAX_THREADS};

use super::list::ThreadList;

/// State shared by all processors, guarded by the kernel's global lock
pub struct GlobalTable {
    free: Deque<ThreadId, MAX_THREADS>,
    all: ThreadList,
}

impl GlobalTable {
    /// Creates a table whose first `reserved` identifiers are in use
    ///
    /// The reserved identifiers belong to the idle threads and are linked into
    /// the global list immediately. The rest form the free pool in ascending
    /// order.
    pub fn new(reserved: usize) -> Self {
        let mut free = Deque::new();
        let mut all = ThreadList::new();
        for index in 0..MAX_THREADS {
            let id = ThreadId(index as u8);
            if index < reserved {
                all.push_back(id);
            } else {
                // Capacity equals the identifier range.
                let _ = free.push_back(id);
            }
        }
        Self { free, all }
    }

    /// Takes the oldest free identifier and links it into the global list
    pub fn allocate(&mut self) -> Option<ThreadId> {
        let id = self.free.pop_front()?;
        self.all.push_back(id);
        Some(id)
    }

    /// Unlinks `id` and returns it to the back of the free pool
    pub fn release(&mut self, id: ThreadId) {
        if self.all.remove(id) {
            let _ = self.free.push_back(id);
        }
    }

    /// Number of identifiers in use, idle threads included
    pub fn live(&self) -> usize {
        self.all.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Every live thread, oldest first
    pub fn all(&self) -> &ThreadList {
        &self.all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids_skipped() {
        let mut table = GlobalTable::new(2);
        assert_eq!(table.live(), 2);
        assert_eq!(table.allocate(), Some(ThreadId(2)));
        assert_eq!(table.free_count(), MAX_THREADS - 3);
    }

    #[test]
    fn test_release_is_fifo() {
        let mut table = GlobalTable::new(1);
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        table.release(a);
        table.release(b);

        // Released ids go to the back, behind every never-used id.
        let next = table.allocate().unwrap();
        assert_ne!(next, a);
        assert_ne!(next, b);
    }

    #[test]
    fn test_exhaustion() {
        let mut table = GlobalTable::new(6);
        let mut taken = 0;
        while table.allocate().is_some() {
            taken += 1;
        }
        assert_eq!(taken, MAX_THREADS - 6);
        assert_eq!(table.live(), MAX_THREADS);

        table.release(ThreadId(200));
        assert_eq!(table.allocate(), Some(ThreadId(200)));
    }

    #[test]
    fn test_double_release_ignored() {
        let mut table = GlobalTable::new(1);
        let id = table.allocate().unwrap();
        table.release(id);
        let before = table.free_count();
        table.release(id);
        assert_eq!(table.free_count(), before);
    }
}
