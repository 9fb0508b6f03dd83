use crate::analysis::{analyze_program, ApproximabilityAnalysis};
use crate::analysis_config::{AnalysisConfig, CommandLineAnalysisConfig};
use crate::il::{Function, InsnId, Op, Program, Value};
use crate::il_parser::lift_from;
use crate::report::OpcodeCounts;

pub fn scenario_program() -> Program {
    lift_from(include_str!("../tests/approx-scenarios.ir")).unwrap()
}

/// Function `f` loads a pointer from a slot and stores that pointer through an address
/// equivalent to one that is dereferenced elsewhere.
pub fn pointer_copy_program() -> Program {
    lift_from(
        "define void @f(i32** %pp) {
           %a = getelementptr i32**, %pp, 1
           %p = load i32*, %a
           store i32 1, %p
           %b = getelementptr i32**, %pp, 1
           %q = load i32*, %b
           %c = getelementptr i32**, %pp, 1
           store i32* %q, %c
           ret void
         }",
    )
    .unwrap()
}

/// Function `f` is a loop with an induction variable (indexing memory) and an accumulator (only
/// ever stored).
pub fn loop_program() -> Program {
    lift_from(
        "define void @f(i32* %array, i32 %n, double %x, double* %dst) {
         entry:
           br %loop
         loop:
           %i = phi i32 [0, %entry], [%i.next, %loop]
           %acc = phi double [0.0, %entry], [%acc.next, %loop]
           %acc.next = fmul double %acc, %x
           %idx = sext i32 %i to i64
           %slot = getelementptr i32*, %array, %idx
           store i32 7, %slot
           %i.next = add i32 %i, 1
           %cmp = icmp slt i32 %i.next, %n
           br %cmp, %loop, %exit
         exit:
           store double %acc.next, %dst
           ret void
         }",
    )
    .unwrap()
}

#[cfg(test)]
fn counts(total: usize, approximable: usize) -> OpcodeCounts {
    OpcodeCounts {
        total,
        approximable,
    }
}

#[cfg(test)]
fn named(f: &Function, name: &str) -> InsnId {
    f.instructions()
        .find(|(_, ins)| ins.name.as_deref() == Some(name))
        .map(|(id, _)| id)
        .unwrap_or_else(|| panic!("no instruction named {} in {}", name, f.name()))
}

#[cfg(test)]
fn analyze<'a>(
    prog: &'a Program,
    name: &str,
    config: &AnalysisConfig,
) -> ApproximabilityAnalysis<'a> {
    ApproximabilityAnalysis::analyze_with_config(prog.function(name).unwrap(), config)
}

/// Every transitive operand of a memory access, call, or branch is exact, where walks stop past
/// loads and skip the value being stored.
#[cfg(test)]
fn assert_sink_operands_exact(analysis: &ApproximabilityAnalysis) {
    let f = analysis.function();
    for (root, ins) in f.instructions() {
        if !(ins.op.may_read_or_write_memory() || ins.op.is_branch()) {
            continue;
        }
        let skip = if ins.op == Op::Store { 1 } else { 0 };
        let mut stack: Vec<&Value> = ins.operands.iter().skip(skip).collect();
        let mut seen = vec![root];
        while let Some(v) = stack.pop() {
            if let Some((id, def)) = f.as_instruction(v) {
                assert!(
                    analysis.is_exact(id),
                    "{} feeds {} in {} but is not exact",
                    f.display_instruction(id),
                    f.display_instruction(root),
                    f.name()
                );
                if def.op != Op::Load && !seen.contains(&id) {
                    seen.push(id);
                    stack.extend(def.operands.iter());
                }
            }
        }
    }
}

#[test]
fn plain_arithmetic_is_approximable() {
    let prog = scenario_program();
    let a = analyze(&prog, "allApprox1", &AnalysisConfig::default());
    let r = a.report();
    assert_eq!(r.get("add"), Some(counts(3, 3)));
    assert_eq!(r.get("mul"), Some(counts(1, 1)));
    assert_eq!(r.get("load"), Some(counts(6, 6)));
    assert!(a.address_set().is_empty());
    assert_sink_operands_exact(&a);
}

#[test]
fn index_arithmetic_is_exact() {
    let prog = scenario_program();
    let a = analyze(&prog, "noneApprox2", &AnalysisConfig::default());
    let f = a.function();
    assert_eq!(a.report().get("add"), Some(counts(1, 0)));
    for name in ["add", "idxprom", "arrayidx", "2"] {
        assert!(a.is_exact(named(f, name)), "{} should be exact", name);
    }
    assert_sink_operands_exact(&a);
}

#[test]
fn values_stored_back_to_dereferenced_slots_are_exact() {
    let prog = scenario_program();
    let config = AnalysisConfig::default();
    let a = analyze(&prog, "noneApprox1", &config);
    assert_eq!(a.report().get("add"), Some(counts(3, 0)));
    assert_eq!(a.address_set().len(), 3);
    assert_sink_operands_exact(&a);

    // Only the backward walk: every add is stored as data
    let backward_only =
        AnalysisConfig::from(vec![CommandLineAnalysisConfig::DisableForwardPropagation]);
    let b = analyze(&prog, "noneApprox1", &backward_only);
    assert_eq!(b.report().get("add"), Some(counts(3, 3)));
    assert_eq!(b.rounds(), 0);
}

#[test]
fn unoptimised_loop_counter_is_exact() {
    let prog = scenario_program();
    let a = analyze(&prog, "forloop1", &AnalysisConfig::default());
    let r = a.report();
    assert_eq!(r.get("icmp"), Some(counts(1, 0)));
    assert_eq!(r.get("add"), Some(counts(1, 0)));
    assert!(a.is_exact(named(a.function(), "inc")));
    assert_sink_operands_exact(&a);
}

#[test]
fn ssa_loop_keeps_accumulator_approximable() {
    let prog = loop_program();
    let a = analyze(&prog, "f", &AnalysisConfig::default());
    let f = a.function();
    for name in ["i", "i.next", "cmp", "idx", "slot"] {
        assert!(a.is_exact(named(f, name)), "{} should be exact", name);
    }
    for name in ["acc", "acc.next"] {
        assert!(!a.is_exact(named(f, name)), "{} should be approximable", name);
    }
    let r = a.report();
    assert_eq!(r.get("fmul"), Some(counts(1, 1)));
    assert_eq!(r.get("phi"), Some(counts(2, 1)));
    assert_sink_operands_exact(&a);
}

#[test]
fn arithmetic_used_as_store_index_is_exact() {
    let prog = lift_from(
        "define void @f(i32 %a, i32 %b, i32* %array) {
           %s = add i32 %a, %b
           %t = sub i32 %s, 1
           %g = getelementptr i32*, %array, %t
           store i32 5, %g
           ret void
         }",
    )
    .unwrap();
    let a = analyze(&prog, "f", &AnalysisConfig::default());
    let r = a.report();
    assert_eq!(r.get("add"), Some(counts(1, 0)));
    assert_eq!(r.get("sub"), Some(counts(1, 0)));
    assert_eq!(r.get("store"), Some(counts(1, 1)));
    assert_sink_operands_exact(&a);
}

#[test]
fn loaded_index_is_exact_but_its_copies_are_not() {
    let prog = lift_from(
        "define void @f(i32* %idx_slot, i32* %array, i32* %second, i32* %out) {
           %v = load i32, %idx_slot
           store %v, %second
           %g = getelementptr i32*, %array, %v
           %w = load i32, %g
           %cp = add i32 %v, 0
           store %cp, %out
           ret void
         }",
    )
    .unwrap();
    let a = analyze(&prog, "f", &AnalysisConfig::default());
    let f = a.function();
    assert!(a.is_exact(named(f, "v")));
    assert!(a.is_exact(named(f, "g")));
    assert!(!a.is_exact(named(f, "cp")));
    assert!(!a.is_exact(named(f, "w")));
    assert_eq!(a.report().get("store"), Some(counts(2, 2)));
    // The parameter is tracked, but it has no users to propagate from
    assert_eq!(a.address_set().all().collect::<Vec<_>>(), vec![&Value::Argument(0)]);
}

#[test]
fn pointer_stored_as_data_is_exact() {
    let prog = pointer_copy_program();
    let config = AnalysisConfig::default();
    let a = analyze(&prog, "f", &config);
    let f = a.function();
    let a_slot = named(f, "a");
    assert_eq!(
        a.address_set().all().collect::<Vec<_>>(),
        vec![&Value::Instruction(a_slot)]
    );
    assert!(a.is_exact(named(f, "q")));
    let store = f
        .instructions()
        .filter(|(_, ins)| ins.op == Op::Store)
        .map(|(id, _)| id)
        .last()
        .unwrap();
    assert!(a.is_exact(store));

    let without_broadening =
        AnalysisConfig::from(vec![CommandLineAnalysisConfig::DisableAddressBroadening]);
    let b = analyze(&prog, "f", &without_broadening);
    assert!(!b.is_exact(named(b.function(), "q")));

    let backward_only =
        AnalysisConfig::from(vec![CommandLineAnalysisConfig::DisableForwardPropagation]);
    let c = analyze(&prog, "f", &backward_only);
    assert!(!c.is_exact(named(c.function(), "q")));
}

#[test]
fn branch_conditions_are_configurable_sinks() {
    let prog = scenario_program();
    let a = analyze(&prog, "conditions5", &AnalysisConfig::default());
    assert_eq!(a.report().get("add"), Some(counts(2, 0)));
    assert_eq!(a.report().get("icmp"), Some(counts(1, 0)));
    assert_sink_operands_exact(&a);

    let no_branches = AnalysisConfig::from(vec![CommandLineAnalysisConfig::DisableBranchSinks]);
    let b = analyze(&prog, "conditions5", &no_branches);
    assert_eq!(b.report().get("add"), Some(counts(2, 2)));
    assert_eq!(b.report().get("icmp"), Some(counts(1, 1)));
}

#[test]
fn returned_values_are_approximable() {
    let prog = scenario_program();
    let a = analyze(&prog, "extra3", &AnalysisConfig::default());
    assert_eq!(a.report().get("add"), Some(counts(2, 2)));
    assert_eq!(a.report().get("ret"), Some(counts(1, 1)));
    assert_eq!(a.report().get("getelementptr"), Some(counts(2, 0)));
}

#[test]
fn conditions_report() {
    let prog = scenario_program();
    let a = analyze(&prog, "conditions5", &AnalysisConfig::default());
    assert_eq!(
        a.report().to_string(),
        "\n\
         ===================Function conditions5===================\n\
         \n\
         add: 0/2 can be approximated\n\
         alloca: 0/1 can be approximated\n\
         br: 3/3 can be approximated\n\
         getelementptr: 0/4 can be approximated\n\
         icmp: 0/1 can be approximated\n\
         load: 0/4 can be approximated\n\
         ret: 1/1 can be approximated\n\
         store: 3/4 can be approximated\n\
         \n"
    );
}

#[test]
fn rerunning_changes_nothing() {
    let prog = scenario_program();
    let config = AnalysisConfig::default();
    for f in prog.functions.iter().filter(|f| !f.is_declaration()) {
        let mut a = ApproximabilityAnalysis::analyze_with_config(f, &config);
        let again = ApproximabilityAnalysis::analyze_with_config(f, &config);
        assert_eq!(a.report(), again.report(), "in {}", f.name());

        let exact: Vec<InsnId> = a.marks().exact().collect();
        let tracked = a.address_set().len();
        a.run(&config);
        assert_eq!(a.marks().exact().collect::<Vec<_>>(), exact, "in {}", f.name());
        assert_eq!(a.address_set().len(), tracked, "in {}", f.name());
    }
}

#[test]
fn forward_pass_only_adds_marks() {
    let prog = scenario_program();
    let full = AnalysisConfig::default();
    let backward_only =
        AnalysisConfig::from(vec![CommandLineAnalysisConfig::DisableForwardPropagation]);
    for f in prog.functions.iter().filter(|f| !f.is_declaration()) {
        let a = ApproximabilityAnalysis::analyze_with_config(f, &backward_only);
        let b = ApproximabilityAnalysis::analyze_with_config(f, &full);
        for id in a.marks().exact() {
            assert!(b.is_exact(id), "{} lost its mark", f.display_instruction(id));
        }
        assert!(b.address_set().len() >= a.address_set().len());
    }
}

#[test]
fn whole_program_skips_declarations() {
    let prog = scenario_program();
    let analyses = analyze_program(&prog, &AnalysisConfig::default());
    let names: Vec<&str> = analyses.iter().map(|a| a.function().name()).collect();
    assert_eq!(
        names,
        vec![
            "allApprox1",
            "noneApprox1",
            "noneApprox2",
            "forloop1",
            "conditions5",
            "extra3"
        ]
    );
    for a in &analyses {
        assert!(a.function().try_confirm_valid().is_ok());
        assert_eq!(a.report().totals().total, a.function().len());
    }
}

#[test]
fn pointer_stored_through_a_dereferenced_global_is_exact() {
    let prog = lift_from(
        "@gp = global i32* null
         define void @f() {
           %s = alloca i32*
           %a = load i32*, %s
           store i32 1, %a
           %p = load i32*, @gp
           store i32 1, %p
           %z = load i32*, %s
           store i32* %z, @gp
           ret void
         }",
    )
    .unwrap();
    let a = analyze(&prog, "f", &AnalysisConfig::default());
    let f = a.function();
    assert_eq!(
        a.address_set().all().collect::<Vec<_>>(),
        vec![&Value::Instruction(named(f, "s")), &Value::Global("gp".into())]
    );
    assert!(a.is_exact(named(f, "z")));
    let last_store = f
        .instructions()
        .filter(|(_, ins)| ins.op == Op::Store)
        .map(|(id, _)| id)
        .last()
        .unwrap();
    assert!(a.is_exact(last_store));
}

#[test]
fn later_users_of_a_pointer_stored_as_data_are_exact() {
    let prog = lift_from(
        "define void @f(i64* %out) {
           %s = alloca i32*
           %a = load i32*, %s
           store i32 1, %a
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
    let a = analyze(&prog, "f", &AnalysisConfig::default());
    let f = a.function();
    for name in ["v", "w", "z"] {
        assert!(a.is_exact(named(f, name)), "{} should be exact", name);
    }
    assert!(!a.is_exact(named(f, "y")));
}

#[test]
fn loop_carried_pointer_stored_as_data_is_exact() {
    let prog = lift_from(
        "define void @f() {
         entry:
           %s = alloca i32*
           %a = load i32*, %s
           store i32 1, %a
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
    // A single forward pass, so that only the forward walk can mark `%v.next`
    let single_pass =
        AnalysisConfig::from(vec![CommandLineAnalysisConfig::DisableFixedPointIteration]);
    for config in [AnalysisConfig::default(), single_pass] {
        let a = analyze(&prog, "f", &config);
        let f = a.function();
        for name in ["p", "v", "v.next"] {
            assert!(a.is_exact(named(f, name)), "{} should be exact", name);
        }
    }
}
