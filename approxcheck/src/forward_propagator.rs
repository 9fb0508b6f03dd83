//! Forward data-flow propagation from tracked addresses.
//!
//! Catches pointers used as data: a value read (through at least one load) from a tracked
//! address, and later written by a store whose address is equivalent to a tracked address, is
//! itself something other code dereferences. Such a stored value, and every instruction on the
//! forward path that leads to the store, is exact.

use crate::address_set::AddressSet;
use crate::analysis_config::AnalysisConfig;
use crate::containers::unordered::UnorderedSet;
use crate::containers::InsertionOrderedSet;
use crate::il::{Function, InsnId, Op, Value};
use crate::log::*;
use crate::marks::Marks;
use crate::structural_equivalence::AliasOracle;

/// A point of the forward walk: an instruction, and whether the path to it passed through a load
type State = (InsnId, bool);

enum Frame {
    Enter(State),
    Exit(State),
}

pub struct ForwardPropagator<'a> {
    func: &'a Function,
    oracle: &'a dyn AliasOracle,
    address_broadening: bool,
}

impl<'a> ForwardPropagator<'a> {
    pub fn new(func: &'a Function, oracle: &'a dyn AliasOracle, config: &AnalysisConfig) -> Self {
        Self {
            func,
            oracle,
            address_broadening: config.address_broadening,
        }
    }

    /// The instructions to propagate from: every tracked instruction address and, with
    /// broadening, every instruction shallowly equivalent to a tracked address that is not a stack
    /// slot. Tracked parameters and globals are not seeds themselves, since their users are not
    /// known.
    pub fn seeds(&self, addresses: &AddressSet) -> Vec<InsnId> {
        let mut seeds = InsertionOrderedSet::new();
        for id in addresses.all().filter_map(Value::as_instruction) {
            seeds.insert(id);
        }
        if self.address_broadening {
            for a in addresses.all().filter_map(Value::as_instruction) {
                if self.func.instruction(a).op == Op::Alloca {
                    continue;
                }
                let av = Value::Instruction(a);
                for other in self.func.instruction_ids() {
                    if other != a
                        && self.oracle.equivalent(&av, &Value::Instruction(other), false)
                        && seeds.insert(other).1
                    {
                        trace!("Broadened address"; "address" => ?a, "equivalent" => ?other);
                    }
                }
            }
        }
        seeds.as_slice().to_vec()
    }

    /// Propagate from every seed (see [`Self::seeds`]). Returns the newly marked instructions, in
    /// the order they were marked.
    pub fn propagate_all(&self, marks: &mut Marks, addresses: &AddressSet) -> Vec<InsnId> {
        let mut newly_marked = vec![];
        for seed in self.seeds(addresses) {
            newly_marked.extend(self.propagate_from_address(seed, marks, addresses));
        }
        newly_marked
    }

    /// Walk the users of `seed` transitively. Returns the newly marked instructions, in the order
    /// they were marked.
    ///
    /// Which [`State`]s reach an aliased store is a least fixed point over the user graph, so a
    /// state on a cycle (through phis) reaches whenever any state of the cycle does. Users of a
    /// value are then marked in program order: the first user that reaches, and every user after
    /// it, is exact.
    pub fn propagate_from_address(
        &self,
        seed: InsnId,
        marks: &mut Marks,
        addresses: &AddressSet,
    ) -> Vec<InsnId> {
        let order = self.reachable_states(seed);
        let mut reaching: UnorderedSet<State> = UnorderedSet::new();
        loop {
            let mut changed = false;
            for &state in &order {
                if !reaching.contains(&state) && self.reaches(state, &reaching, addresses) {
                    reaching.insert(state);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut newly_marked = vec![];
        let mut mark = |id: InsnId| {
            if marks.mark(id) {
                newly_marked.push(id);
            }
        };
        // No load has been passed yet at the seed
        let mut running = false;
        for &w in self.func.users(seed) {
            running = running || reaching.contains(&(w, false));
            if running {
                mark(w);
            }
        }
        for &state in &order {
            let u = state.0;
            let continuation = self.continuation(state);
            let mut running = false;
            for &w in self.func.users(u) {
                if continuation && self.is_aliased_store_of(w, u, addresses) {
                    debug!(
                        "Pointer stored as data";
                        "seed" => ?seed,
                        "store" => %self.func.display_instruction(w),
                    );
                    running = true;
                } else {
                    running = running || reaching.contains(&(w, continuation));
                }
                if running {
                    mark(w);
                }
            }
        }

        newly_marked
    }

    /// Every state reachable from the users of `seed`, in post-order
    fn reachable_states(&self, seed: InsnId) -> Vec<State> {
        let mut order = vec![];
        let mut visited: UnorderedSet<State> = UnorderedSet::new();
        let mut stack: Vec<Frame> = self
            .func
            .users(seed)
            .iter()
            .rev()
            .map(|&u| Frame::Enter((u, false)))
            .collect();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(state) => {
                    if !visited.insert(state) {
                        continue;
                    }
                    stack.push(Frame::Exit(state));
                    let continuation = self.continuation(state);
                    for &w in self.func.users(state.0).iter().rev() {
                        if !visited.contains(&(w, continuation)) {
                            stack.push(Frame::Enter((w, continuation)));
                        }
                    }
                }
                Frame::Exit(state) => order.push(state),
            }
        }

        order
    }

    /// Whether some user of the state's instruction is an aliased store of it, or is a state
    /// already known to reach one
    fn reaches(&self, state: State, reaching: &UnorderedSet<State>, addresses: &AddressSet) -> bool {
        let (u, _) = state;
        let continuation = self.continuation(state);
        self.func.users(u).iter().any(|&w| {
            (continuation && self.is_aliased_store_of(w, u, addresses))
                || reaching.contains(&(w, continuation))
        })
    }

    /// Whether the users of the state's instruction are reached after a load
    fn continuation(&self, (u, saw_load): State) -> bool {
        saw_load || self.func.instruction(u).op == Op::Load
    }

    /// Whether `w` stores the value `v` through an address equivalent to a tracked one
    fn is_aliased_store_of(&self, w: InsnId, v: InsnId, addresses: &AddressSet) -> bool {
        let ins = self.func.instruction(w);
        ins.op == Op::Store
            && ins.operands.first() == Some(&Value::Instruction(v))
            && ins
                .address_operand()
                .map_or(false, |a| addresses.contains(self.oracle, a))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il_parser::lift_from;
    use crate::structural_equivalence::StructuralEquivalence;

    fn named(f: &Function, name: &str) -> InsnId {
        f.instructions()
            .find(|(_, i)| i.name.as_deref() == Some(name))
            .map(|(id, _)| id)
            .unwrap()
    }

    // `*q = *p` where both `p` and `q` are loaded from the same slot
    const POINTER_COPY: &str = "define void @f(i32*** %handle) {
           %slot = load i32**, %handle
           %p = load i32*, %slot
           %v = load i32, %p
           %w = add i32 %v, 0
           %q = load i32*, %slot
           store %w, %q
           ret void
         }";

    #[test]
    fn pointer_stored_as_data_is_exact() {
        let prog = lift_from(POINTER_COPY).unwrap();
        let f = prog.function("f").unwrap();
        let oracle = StructuralEquivalence::new(f);
        let fwd = ForwardPropagator::new(f, &oracle, &AnalysisConfig::default());
        let mut marks = Marks::new(f);
        let mut addresses = AddressSet::new(true);
        addresses.record(&oracle, &named(f, "q").into());

        let newly = fwd.propagate_from_address(named(f, "slot"), &mut marks, &addresses);
        let store = f.instructions().find(|(_, i)| i.op == Op::Store).unwrap().0;
        assert!(marks.is_exact(named(f, "w")));
        assert!(marks.is_exact(named(f, "v")));
        assert!(marks.is_exact(named(f, "p")));
        assert!(marks.is_exact(store));
        // `%q` comes after `%p` among the users of the seed; the seed itself is untouched
        assert!(marks.is_exact(named(f, "q")));
        assert!(!marks.is_exact(named(f, "slot")));
        assert_eq!(newly.len(), marks.count_exact());

        // Running again changes nothing
        let again = fwd.propagate_from_address(named(f, "slot"), &mut marks, &addresses);
        assert!(again.is_empty());
    }

    #[test]
    fn no_hit_without_tracked_address() {
        let prog = lift_from(POINTER_COPY).unwrap();
        let f = prog.function("f").unwrap();
        let oracle = StructuralEquivalence::new(f);
        let fwd = ForwardPropagator::new(f, &oracle, &AnalysisConfig::default());
        let mut marks = Marks::new(f);
        let addresses = AddressSet::new(true);
        assert!(fwd
            .propagate_from_address(named(f, "slot"), &mut marks, &addresses)
            .is_empty());
    }

    #[test]
    fn broadening_skips_stack_slots() {
        let prog = lift_from(
            "define void @f(i32* %base) {
               %s1 = alloca i32
               %s2 = alloca i32
               %g1 = getelementptr i32*, %base, 1
               %g2 = getelementptr i32*, %base, 1
               %g3 = getelementptr i32*, %base, 2
               ret void
             }",
        )
        .unwrap();
        let f = prog.function("f").unwrap();
        let oracle = StructuralEquivalence::new(f);
        let mut addresses = AddressSet::new(true);
        addresses.record(&oracle, &named(f, "s1").into());
        addresses.record(&oracle, &named(f, "g1").into());

        let fwd = ForwardPropagator::new(f, &oracle, &AnalysisConfig::default());
        assert_eq!(
            fwd.seeds(&addresses),
            vec![named(f, "s1"), named(f, "g1"), named(f, "g2")]
        );
        let narrow = ForwardPropagator::new(
            f,
            &oracle,
            &AnalysisConfig {
                address_broadening: false,
                ..Default::default()
            },
        );
        assert_eq!(narrow.seeds(&addresses), vec![named(f, "s1"), named(f, "g1")]);
    }

    #[test]
    fn cyclic_users_terminate() {
        let prog = lift_from(
            "define void @f(i32** %pp) {
             entry:
               %p = load i32*, %pp
               br %loop
             loop:
               %v = phi i32* [%p, %entry], [%v.next, %loop]
               %v.next = getelementptr i32*, %v, 1
               %x = load i32, %v.next
               store %x, %v.next
               br %loop
             }",
        )
        .unwrap();
        let f = prog.function("f").unwrap();
        let oracle = StructuralEquivalence::new(f);
        let fwd = ForwardPropagator::new(f, &oracle, &AnalysisConfig::default());
        let mut marks = Marks::new(f);
        let mut addresses = AddressSet::new(true);
        addresses.record(&oracle, &named(f, "v.next").into());
        fwd.propagate_from_address(named(f, "p"), &mut marks, &addresses);
        assert!(marks.is_exact(named(f, "x")));
        assert!(marks.is_exact(named(f, "v")));
        assert!(!marks.is_exact(named(f, "p")));
    }

    #[test]
    fn users_after_a_reaching_user_are_exact() {
        let prog = lift_from(
            "define void @f(i64* %out) {
               %s = alloca i32*
               %v = load i32*, %s
               %w = getelementptr i32*, %v, 0
               store i32* %w, %s
               %z = ptrtoint i32* %v to i64
               %y = add i64 %z, 1
               store i64 %y, %out
               ret void
             }",
        )
        .unwrap();
        let f = prog.function("f").unwrap();
        let oracle = StructuralEquivalence::new(f);
        let fwd = ForwardPropagator::new(f, &oracle, &AnalysisConfig::default());
        let mut marks = Marks::new(f);
        let mut addresses = AddressSet::new(true);
        addresses.record(&oracle, &named(f, "s").into());

        fwd.propagate_from_address(named(f, "s"), &mut marks, &addresses);
        assert!(marks.is_exact(named(f, "v")));
        assert!(marks.is_exact(named(f, "w")));
        assert!(marks.is_exact(named(f, "z")));
        // Only the users of `%v` are affected, not what follows from them
        assert!(!marks.is_exact(named(f, "y")));
    }

    #[test]
    fn loop_carried_values_reaching_a_store_are_exact() {
        let prog = lift_from(
            "define void @f(i32 %n) {
             entry:
               %s = alloca i32*
               %p = load i32*, %s
               br %loop
             loop:
               %v = phi i32* [%p, %entry], [%v.next, %loop]
               %v.next = getelementptr i32*, %v, 1
               store i32* %v, %s
               br %loop
             }",
        )
        .unwrap();
        let f = prog.function("f").unwrap();
        let oracle = StructuralEquivalence::new(f);
        let fwd = ForwardPropagator::new(f, &oracle, &AnalysisConfig::default());
        let mut marks = Marks::new(f);
        let mut addresses = AddressSet::new(true);
        addresses.record(&oracle, &named(f, "s").into());

        fwd.propagate_from_address(named(f, "s"), &mut marks, &addresses);
        assert!(marks.is_exact(named(f, "p")));
        assert!(marks.is_exact(named(f, "v")));
        assert!(marks.is_exact(named(f, "v.next")));
    }
}
