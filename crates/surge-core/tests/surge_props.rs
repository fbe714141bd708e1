use proptest::prelude::*;
use surge_core::surge::{plan_step, Counters, Observed, Step, WaitReason};

/// Target, surge budget and counters that respect the surge invariant
fn valid_state() -> impl proptest::strategy::Strategy<Value = (i32, i32, Counters)> {
    (1..40i32, 1..8i32)
        .prop_flat_map(|(target, max_surge)| (Just(target), Just(max_surge), 0..=target))
        .prop_flat_map(|(target, max_surge, src)| {
            let max_extra = max_surge.min(target - src);
            (Just(target), Just(max_surge), Just(src), 0..=max_extra)
        })
        .prop_map(|(target, max_surge, src, surge)| {
            (
                target,
                max_surge,
                Counters {
                    src_migrated: src,
                    dst_migrated: src + surge,
                },
            )
        })
}

fn observed() -> impl proptest::strategy::Strategy<Value = Observed> {
    (0..60i32, 0..60i32, 0..60i32).prop_map(|(src_declared, dst_declared, dst_available)| {
        Observed {
            src_declared,
            dst_declared,
            dst_available,
        }
    })
}

#[test]
fn complete_only_at_target() {
    let at_target = Counters {
        src_migrated: 3,
        dst_migrated: 3,
    };
    assert_eq!(plan_step(3, 1, at_target, Observed::default()), Step::Complete);
}

proptest! {
    #[test]
    fn prop_step_preserves_invariants(
        (target, max_surge, counters) in valid_state(),
        observed in observed(),
    ) {
        let step = plan_step(target, max_surge, counters, observed);
        let next = counters.after(step);

        prop_assert!(next.surge() <= max_surge);
        prop_assert!(next.surge() >= 0);
        prop_assert!(next.src_migrated >= counters.src_migrated);
        prop_assert!(next.dst_migrated >= counters.dst_migrated);
        prop_assert!(next.src_migrated <= target);
        prop_assert!(next.dst_migrated <= target);

        match step {
            Step::ScaleOut(n) => prop_assert!(n > 0 && n <= max_surge),
            Step::ScaleIn(n) => {
                prop_assert!(n > 0 && n <= observed.src_declared);
                prop_assert_eq!(observed.dst_declared, observed.dst_available);
            }
            Step::Complete => {
                prop_assert_eq!(counters.src_migrated, target);
                prop_assert_eq!(counters.dst_migrated, target);
            }
            Step::Wait(WaitReason::DestinationUnavailable) => {
                prop_assert_ne!(observed.dst_declared, observed.dst_available);
            }
            Step::Wait(WaitReason::Idle) => {}
        }
    }

    #[test]
    fn prop_healthy_migration_terminates(
        target in 1..60i32,
        max_surge in 1..10i32,
        extra_src in 0..5i32,
        initial_dst in 0..5i32,
    ) {
        let mut counters = Counters::default();
        let mut src = target + extra_src;
        let mut dst = initial_dst;
        let mut steps = 0;

        loop {
            let step = plan_step(target, max_surge, counters, Observed {
                src_declared: src,
                dst_declared: dst,
                dst_available: dst,
            });
            match step {
                Step::Complete => break,
                Step::ScaleOut(n) => dst += n,
                Step::ScaleIn(n) => src -= n,
                Step::Wait(reason) => prop_assert!(false, "stalled: {:?}", reason),
            }
            counters = counters.after(step);
            steps += 1;
            prop_assert!(steps <= 2 * target, "too many steps");
        }

        prop_assert_eq!(src, extra_src);
        prop_assert_eq!(dst, initial_dst + target);
    }
}
