//! A complete approximability analysis run over one function.

use crate::address_set::AddressSet;
use crate::analysis_config::{AnalysisConfig, CONFIG};
use crate::backward_walker::BackwardWalker;
use crate::forward_propagator::ForwardPropagator;
use crate::il::{Function, InsnId, Program};
use crate::log::*;
use crate::marks::{Mark, Marks};
use crate::report::ApproximabilityReport;
use crate::structural_equivalence::StructuralEquivalence;

/// The result of analysing a function: which instructions are exact, and which addresses were
/// found to be dereferenced as pointers. All state belongs to this run.
#[derive(Debug)]
pub struct ApproximabilityAnalysis<'a> {
    func: &'a Function,
    marks: Marks,
    addresses: AddressSet,
    /// Number of forward passes performed
    rounds: usize,
}

impl<'a> ApproximabilityAnalysis<'a> {
    /// Analyze `func` under the global [`CONFIG`](static@CONFIG)
    pub fn analyze(func: &'a Function) -> Self {
        Self::analyze_with_config(func, &CONFIG)
    }

    pub fn analyze_with_config(func: &'a Function, config: &AnalysisConfig) -> Self {
        let mut analysis = Self {
            func,
            marks: Marks::new(func),
            addresses: AddressSet::new(config.deep_address_equivalence),
            rounds: 0,
        };
        analysis.run(config);
        info!(
            "Analyzed function";
            "name" => func.name(),
            "instructions" => func.len(),
            "exact" => analysis.marks.count_exact(),
            "addresses" => analysis.addresses.len(),
            "rounds" => analysis.rounds,
        );
        analysis
    }

    /// Run the backward and forward passes from the current state. Marks and addresses only grow,
    /// so this may be repeated; on a finished analysis it changes nothing.
    pub fn run(&mut self, config: &AnalysisConfig) {
        let oracle = StructuralEquivalence::new(self.func);
        let backward = BackwardWalker::new(self.func, &oracle, config);
        let forward = ForwardPropagator::new(self.func, &oracle, config);

        let marked = backward.mark_all_sinks(&mut self.marks, &mut self.addresses);
        debug!(
            "Backward walk done";
            "function" => self.func.name(),
            "newly_marked" => marked,
            "addresses" => self.addresses.len(),
        );
        if !config.forward_propagation {
            return;
        }

        loop {
            let tracked = self.addresses.len();
            let newly_marked = forward.propagate_all(&mut self.marks, &self.addresses);
            self.rounds += 1;
            debug!(
                "Forward pass done";
                "function" => self.func.name(),
                "round" => self.rounds,
                "newly_marked" => newly_marked.len(),
            );
            if !config.fixed_point_iteration {
                break;
            }
            // What the forward pass found exact is consumed exactly too
            for id in newly_marked {
                backward.mark_dependencies(id, &mut self.marks, &mut self.addresses);
            }
            if self.addresses.len() == tracked {
                break;
            }
        }
    }

    pub fn function(&self) -> &'a Function {
        self.func
    }

    pub fn marks(&self) -> &Marks {
        &self.marks
    }

    pub fn mark(&self, id: InsnId) -> Mark {
        self.marks.get(id)
    }

    pub fn is_exact(&self, id: InsnId) -> bool {
        self.marks.is_exact(id)
    }

    pub fn address_set(&self) -> &AddressSet {
        &self.addresses
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Per-opcode counts of this run
    pub fn report(&self) -> ApproximabilityReport {
        ApproximabilityReport::new(self.func, &self.marks)
    }
}

/// Analyze every function with a body, independently of each other
pub fn analyze_program<'a>(
    prog: &'a Program,
    config: &AnalysisConfig,
) -> Vec<ApproximabilityAnalysis<'a>> {
    prog.functions
        .iter()
        .filter(|f| !f.is_declaration())
        .map(|f| ApproximabilityAnalysis::analyze_with_config(f, config))
        .collect()
}
