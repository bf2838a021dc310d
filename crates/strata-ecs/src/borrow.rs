//! Runtime borrow tracking for component columns.
//!
//! Each column of an archetype carries one counter:
//!
//! | State | Meaning |
//! |------:|---------|
//! | `0` | Unborrowed |
//! | `n > 0` | `n` shared borrows |
//! | `-1` | One exclusive borrow |
//!
//! Acquisition never waits. A failed acquisition is reported to the caller, which
//! treats it as a programming error.

use std::sync::atomic::{AtomicIsize, Ordering};

const EXCLUSIVE: isize = -1;

/// How a query touches a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Access {
    /// Matches the archetype without reading any column.
    Iterate,
    /// Shared access to one or more columns.
    Read,
    /// Exclusive access to one or more columns.
    Write,
}

/// Observed state of a column's borrow counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowState {
    Unborrowed,
    Shared(usize),
    Exclusive,
}

/// Borrow counter for a single column.
pub struct ColumnBorrow(AtomicIsize);

impl ColumnBorrow {
    pub const fn new() -> Self {
        Self(AtomicIsize::new(0))
    }

    /// Take a shared borrow. Fails if the column is exclusively borrowed.
    pub fn borrow(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return false;
            }
            assert!(current < isize::MAX, "column borrow counter overflow");
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Take the exclusive borrow. Fails if any borrow is outstanding.
    pub fn borrow_mut(&self) -> bool {
        self.0
            .compare_exchange(0, EXCLUSIVE, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release(&self) {
        let previous = self.0.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "released a column that was not shared");
    }

    pub fn release_mut(&self) {
        let previous = self.0.swap(0, Ordering::Release);
        debug_assert_eq!(
            previous, EXCLUSIVE,
            "released a column that was not exclusively borrowed"
        );
    }

    pub fn state(&self) -> BorrowState {
        match self.0.load(Ordering::Acquire) {
            0 => BorrowState::Unborrowed,
            EXCLUSIVE => BorrowState::Exclusive,
            n => BorrowState::Shared(n as usize),
        }
    }
}

impl Default for ColumnBorrow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_borrows_stack() {
        let b = ColumnBorrow::new();
        assert!(b.borrow());
        assert!(b.borrow());
        assert_eq!(b.state(), BorrowState::Shared(2));
        assert!(!b.borrow_mut());
        b.release();
        b.release();
        assert_eq!(b.state(), BorrowState::Unborrowed);
        assert!(b.borrow_mut());
    }

    #[test]
    fn exclusive_blocks_everything() {
        let b = ColumnBorrow::new();
        assert!(b.borrow_mut());
        assert_eq!(b.state(), BorrowState::Exclusive);
        assert!(!b.borrow());
        assert!(!b.borrow_mut());
        b.release_mut();
        assert!(b.borrow());
    }

    #[test]
    fn access_ordering() {
        assert!(Access::Iterate < Access::Read);
        assert!(Access::Read < Access::Write);
        assert_eq!(Access::Read.max(Access::Write), Access::Write);
    }
}
