//! Strand API tests
//! Tests for identifiers, IRQL levels, context layouts and configuration

use strand_api::context::{ARGUMENT_GPR, STACK_FRAME_RESERVE};
use strand_api::{
    Context, CreateFlags, Error, Irql, ProcessorId, SchedulerConfig, SentinelExt, Stack,
    ThreadId, ThreadState, TrapFrame, Vector, MAX_PROCESSORS, VECTOR_COUNT,
};

mod layout_tests {
    use super::*;
    use core::mem::size_of;

    /// Register snapshots keep the sizes the trap entry code assumes
    #[test]
    fn test_layout_sizes() {
        assert_eq!(size_of::<Context>(), 0x238);
        assert_eq!(size_of::<TrapFrame>(), 0x240);
    }

    /// A context survives a trip through a trap frame
    #[test]
    fn test_context_through_trap_frame() {
        let mut ctx = Context::for_entry(0x8000_2000, 7, 0x7000_0000, 0x8000_0100, 0x9030);
        ctx.cr = 0x2200_0000;
        ctx.fpu.fpr[31] = -2.5;

        let mut frame = TrapFrame::zeroed();
        ctx.apply(&mut frame);

        let mut back = Context::zeroed();
        back.capture(&frame);
        assert_eq!(back, ctx);
        assert_eq!(back.gpr[ARGUMENT_GPR], 7);
    }

    #[test]
    fn test_entry_stack_stays_inside_region() {
        let stack = Stack {
            base: 0x4000_0000,
            size: 16 * 1024,
        };
        let ctx = Context::for_entry(0, 0, stack.top(), 0, 0);
        assert!(ctx.stack_pointer() >= stack.base);
        assert!(ctx.stack_pointer() <= stack.top() - STACK_FRAME_RESERVE);
    }
}

mod type_tests {
    use super::*;

    #[test]
    fn test_every_vector_maps_to_its_level() {
        for index in 0..VECTOR_COUNT as u8 {
            let vector = Vector::new(index).expect("vector in range");
            assert_eq!(vector.irql(), Irql(index));
            assert_eq!(vector.bit().count_ones(), 1);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ThreadId(12)), "T12");
        assert_eq!(format!("{}", ProcessorId(3)), "cpu3");
        assert_eq!(format!("{}", Irql::DISPATCH), "DISPATCH");
        assert_eq!(format!("{}", Irql(5)), "IRQL5");
        assert_eq!(format!("{}", ThreadState::Sleeping), "sleeping");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", Error::InvalidPriority(16)),
            "Invalid priority: 16"
        );
        assert_eq!(
            format!("{}", Error::InvalidProcessor(ProcessorId(9))),
            "Invalid processor: cpu9"
        );
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_create_flags_from_bits() {
        assert_eq!(CreateFlags::from_bits(1), Some(CreateFlags::SUSPENDED));
        assert_eq!(CreateFlags::from_bits(0), Some(CreateFlags::empty()));
        assert!(CreateFlags::from_bits(2).is_none());
    }

    #[test]
    fn test_processor_limit() {
        let config = SchedulerConfig::default().with_processors(MAX_PROCESSORS + 1);
        assert!(config.validate(16).is_err());
        assert!(SchedulerConfig::default().validate(16).is_ok());
    }
}

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_sentinel_preserves_counts(count in any::<u8>()) {
            let ok: strand_api::Result<u8> = Ok(count);
            prop_assert_eq!(ok.or_sentinel(), i32::from(count));
        }

        #[test]
        fn prop_entry_stack_aligned(top in 0x1000u64..u64::MAX / 2) {
            let ctx = Context::for_entry(0, 0, top, 0, 0);
            prop_assert_eq!(ctx.stack_pointer() % 16, 0);
            prop_assert!(ctx.stack_pointer() <= top - STACK_FRAME_RESERVE);
        }
    }
}
