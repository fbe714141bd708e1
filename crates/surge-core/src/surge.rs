//! Bounded-surge step planning
//!
//! Pure arithmetic of a single reconcile pass. Given the task's migrated
//! counters and what the platform currently reports, decide the one action to
//! take. Invariants preserved by every planned step:
//! - `dst_migrated - src_migrated <= max_surge`
//! - both counters only grow and never pass `target`
//! - source capacity is only retired once all destination replicas are available

/// Replicas migrated so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Replicas removed from the source
    pub src_migrated: i32,
    /// Replicas added to the destination
    pub dst_migrated: i32,
}

impl Counters {
    /// Replicas currently running above the migrated source count
    #[inline]
    #[must_use]
    pub const fn surge(&self) -> i32 {
        self.dst_migrated - self.src_migrated
    }

    /// Counters after applying a step
    #[must_use]
    pub const fn after(self, step: Step) -> Self {
        match step {
            Step::ScaleOut(n) => Self {
                dst_migrated: self.dst_migrated + n,
                ..self
            },
            Step::ScaleIn(n) => Self {
                src_migrated: self.src_migrated + n,
                ..self
            },
            Step::Complete | Step::Wait(_) => self,
        }
    }
}

/// Platform-reported replica counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observed {
    /// Source declared replicas
    pub src_declared: i32,
    /// Destination declared replicas
    pub dst_declared: i32,
    /// Destination available replicas
    pub dst_available: i32,
}

/// Why a pass takes no action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Surged destination replicas are not all available yet
    DestinationUnavailable,
    /// Nothing can move until something external changes
    Idle,
}

/// The single action of a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Both counters reached the target
    Complete,
    /// Add this many destination replicas
    ScaleOut(i32),
    /// Remove this many source replicas
    ScaleIn(i32),
    /// Do nothing this pass
    Wait(WaitReason),
}

/// Plan the next step
///
/// Scale-out takes precedence; scale-in is only considered when no
/// destination replicas can be added within the surge budget.
#[must_use]
pub fn plan_step(target: i32, max_surge: i32, counters: Counters, observed: Observed) -> Step {
    let Counters {
        src_migrated,
        dst_migrated,
    } = counters;

    if src_migrated >= target && dst_migrated >= target {
        return Step::Complete;
    }

    if dst_migrated < target {
        let delta_surge = max_surge - counters.surge();
        let delta_remaining = target - dst_migrated;
        let scale_out = delta_surge.min(delta_remaining);
        if scale_out > 0 {
            return Step::ScaleOut(scale_out);
        }
    }

    if src_migrated < target {
        let delta_remaining = target - src_migrated;
        let scale_in = observed
            .src_declared
            .min(delta_remaining)
            .min(counters.surge());
        if scale_in > 0 {
            if observed.dst_declared != observed.dst_available {
                return Step::Wait(WaitReason::DestinationUnavailable);
            }
            return Step::ScaleIn(scale_in);
        }
    }

    Step::Wait(WaitReason::Idle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(src: i32, dst: i32) -> Counters {
        Counters {
            src_migrated: src,
            dst_migrated: dst,
        }
    }

    fn observed(src: i32, dst: i32, available: i32) -> Observed {
        Observed {
            src_declared: src,
            dst_declared: dst,
            dst_available: available,
        }
    }

    #[test]
    fn first_step_scales_out_by_surge() {
        let step = plan_step(10, 2, counters(0, 0), observed(10, 0, 0));
        assert_eq!(step, Step::ScaleOut(2));
    }

    #[test]
    fn scale_out_is_bounded_by_remaining() {
        let step = plan_step(3, 5, counters(0, 0), observed(3, 0, 0));
        assert_eq!(step, Step::ScaleOut(3));
    }

    #[test]
    fn scale_in_waits_for_available_destination() {
        let step = plan_step(10, 2, counters(0, 2), observed(10, 2, 1));
        assert_eq!(step, Step::Wait(WaitReason::DestinationUnavailable));

        let step = plan_step(10, 2, counters(0, 2), observed(10, 2, 2));
        assert_eq!(step, Step::ScaleIn(2));
    }

    #[test]
    fn scale_in_bounded_by_source_declared() {
        let step = plan_step(10, 4, counters(0, 4), observed(1, 4, 4));
        assert_eq!(step, Step::ScaleIn(1));
    }

    #[test]
    fn idle_when_source_already_empty() {
        let step = plan_step(10, 2, counters(2, 4), observed(0, 4, 4));
        assert_eq!(step, Step::Wait(WaitReason::Idle));
    }

    #[test]
    fn complete_when_both_at_target() {
        assert_eq!(
            plan_step(4, 1, counters(4, 4), observed(0, 4, 4)),
            Step::Complete
        );
    }

    #[test]
    fn scenario_ten_replicas_surge_two() {
        let target = 10;
        let mut c = Counters::default();
        let mut src = 10;
        let mut dst = 0;
        let mut steps = Vec::new();
        loop {
            let step = plan_step(target, 2, c, observed(src, dst, dst));
            match step {
                Step::Complete => break,
                Step::ScaleOut(n) => dst += n,
                Step::ScaleIn(n) => src -= n,
                Step::Wait(reason) => panic!("unexpected wait: {reason:?}"),
            }
            c = c.after(step);
            assert!(c.surge() <= 2);
            steps.push(step);
        }
        assert_eq!((src, dst), (0, 10));
        assert_eq!(steps.len(), 10);
        assert!(steps
            .iter()
            .all(|s| matches!(s, Step::ScaleOut(2) | Step::ScaleIn(2))));
    }
}
