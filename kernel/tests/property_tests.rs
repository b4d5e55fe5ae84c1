//! Property-based tests
//! Tests for suspend/resume accounting, ready-list membership and id uniqueness

mod common;

use std::collections::HashSet;

use common::{boot, entry, ready};
use proptest::prelude::*;
use strand_api::{CreateFlags, Error, ThreadState};
use strand_kernel::ThreadHandle;

#[derive(Debug, Clone, Copy)]
enum Op {
    Suspend(usize),
    Resume(usize),
    Priority(usize, u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize).prop_map(Op::Suspend),
        (0..4usize).prop_map(Op::Resume),
        (0..4usize, 1..=15u8).prop_map(|(index, priority)| Op::Priority(index, priority)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_suspend_resume_round_trip(n in 1usize..60) {
        let (_sim, kernel) = boot(1);
        let handle = kernel.create(entry, 0, 0, CreateFlags::empty()).unwrap();

        for expected in 0..n {
            prop_assert_eq!(kernel.suspend(handle), Ok(expected as u8));
        }
        prop_assert!(ready(kernel, 0).is_empty());
        for expected in (1..=n).rev() {
            prop_assert_eq!(kernel.resume(handle), Ok(expected as u8));
        }
        prop_assert_eq!(kernel.resume(handle), Err(Error::NotSuspended));
        prop_assert_eq!(ready(kernel, 0), vec![handle.id()]);
    }

    #[test]
    fn prop_ready_iff_unsuspended(ops in prop::collection::vec(op(), 1..80)) {
        let (_sim, kernel) = boot(1);
        let handles: Vec<ThreadHandle> = (0..4)
            .map(|_| kernel.create(entry, 0, 0, CreateFlags::empty()).unwrap())
            .collect();

        for op in ops {
            match op {
                Op::Suspend(index) => {
                    let _ = kernel.suspend(handles[index]);
                }
                Op::Resume(index) => {
                    let _ = kernel.resume(handles[index]);
                }
                Op::Priority(index, priority) => {
                    kernel.set_priority(handles[index], priority).unwrap();
                }
            }
        }

        let listed = ready(kernel, 0);
        let unique: HashSet<_> = listed.iter().collect();
        prop_assert_eq!(unique.len(), listed.len());
        for handle in &handles {
            let count = kernel.suspend_count(*handle).unwrap();
            let state = kernel.thread_state(*handle).unwrap();
            prop_assert_eq!(listed.contains(&handle.id()), count == 0);
            prop_assert_eq!(state == ThreadState::Suspended, count > 0);
        }
    }

    #[test]
    fn prop_live_ids_unique(count in 1usize..200) {
        let (_sim, kernel) = boot(2);
        let ids: HashSet<_> = (0..count)
            .map(|_| kernel.create(entry, 0, 0, CreateFlags::empty()).unwrap().id())
            .collect();

        prop_assert_eq!(ids.len(), count);
        prop_assert!(ids.iter().all(|id| id.0 >= 2));
        prop_assert_eq!(kernel.thread_count(), count + 2);
    }
}
