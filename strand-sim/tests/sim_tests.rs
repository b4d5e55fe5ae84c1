//! Simulated platform tests
//! Tests for stack tracking, interrupt state and register switching

use strand_api::{Context, Irql, Platform, ProcessorId};
use strand_sim::{bind_processor, SimPlatform, EXIT_TRAMPOLINE};

mod stack_tests {
    use super::*;

    #[test]
    fn test_stacks_do_not_overlap() {
        let sim = SimPlatform::new(1);
        let a = sim.allocate_stack(0x3000).expect("first stack");
        let b = sim.allocate_stack(0x3000).expect("second stack");
        assert!(a.top() <= b.base || b.top() <= a.base);
        assert_eq!(sim.live_stacks(), 2);

        sim.free_stack(a);
        assert_eq!(sim.live_stacks(), 1);
        assert_eq!(sim.stacks_freed(), 1);
    }

    #[test]
    fn test_allocation_failure_knob() {
        let sim = SimPlatform::new(1);
        sim.fail_allocations(true);
        assert!(sim.allocate_stack(0x1000).is_none());
        sim.fail_allocations(false);
        assert!(sim.allocate_stack(0x1000).is_some());
    }
}

mod processor_tests {
    use super::*;

    #[test]
    fn test_interrupt_state_is_per_processor() {
        let sim = SimPlatform::new(2);
        bind_processor(ProcessorId(1));
        let state = sim.disable_interrupts();
        sim.set_hardware_irql(Irql::DISPATCH);
        assert!(state.was_enabled());
        assert!(!sim.interrupts_enabled(ProcessorId(1)));
        assert!(sim.interrupts_enabled(ProcessorId(0)));
        assert_eq!(sim.hardware_irql(ProcessorId(1)), Irql::DISPATCH);

        sim.restore_interrupts(state);
        assert!(sim.interrupts_enabled(ProcessorId(1)));
        bind_processor(ProcessorId(0));
    }

    #[test]
    fn test_switch_moves_register_file() {
        let sim = SimPlatform::new(1);
        let mut old = Context::zeroed();
        let new = Context::for_entry(0x8000_4000, 1, 0x2000_0000, EXIT_TRAMPOLINE, 0);

        sim.switch_context(&mut old, &new);
        assert_eq!(sim.registers(ProcessorId(0)).iar, 0x8000_4000);
        assert_eq!(sim.context_switches(), 1);

        let mut snapshot = Context::zeroed();
        sim.save_context(&mut snapshot);
        assert_eq!(snapshot.lr, EXIT_TRAMPOLINE);
    }
}

mod error_tests {
    use strand_api::{Error, ProcessorId};

    fn hosted(result: strand_api::Result<u8>) -> Result<u8, Box<dyn std::error::Error>> {
        Ok(result?)
    }

    #[test]
    fn test_api_errors_box_as_std_errors() {
        assert_eq!(hosted(Ok(4)).unwrap(), 4);

        let err = hosted(Err(Error::InvalidProcessor(ProcessorId(7)))).unwrap_err();
        assert_eq!(err.to_string(), "Invalid processor: cpu7");
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::InvalidProcessor(ProcessorId(7)))
        );
    }
}
