//! Backward dependency walk: everything a sink (transitively) consumes must be exact.

use crate::address_set::AddressSet;
use crate::analysis_config::AnalysisConfig;
use crate::containers::unordered::UnorderedSet;
use crate::il::{Function, InsnId, Instruction, Op};
use crate::log::*;
use crate::marks::Marks;
use crate::structural_equivalence::AliasOracle;

/// Walks def-chains of sinks, marking their transitive operands exact, and records the addresses
/// of loads met along the way.
pub struct BackwardWalker<'a> {
    func: &'a Function,
    oracle: &'a dyn AliasOracle,
    branches_are_sinks: bool,
}

impl<'a> BackwardWalker<'a> {
    pub fn new(func: &'a Function, oracle: &'a dyn AliasOracle, config: &AnalysisConfig) -> Self {
        Self {
            func,
            oracle,
            branches_are_sinks: config.branches_are_sinks,
        }
    }

    /// Whether `ins` requires exact inputs: it may access memory (calls included), or (if enabled)
    /// is a branch.
    pub fn is_sink(&self, ins: &Instruction) -> bool {
        ins.op.may_read_or_write_memory() || (self.branches_are_sinks && ins.op.is_branch())
    }

    /// Walk from every sink of the function, in program order. Returns the number of newly marked
    /// instructions.
    pub fn mark_all_sinks(&self, marks: &mut Marks, addresses: &mut AddressSet) -> usize {
        self.func
            .instructions()
            .filter(|(_, ins)| self.is_sink(ins))
            .map(|(id, _)| self.mark_dependencies(id, marks, addresses))
            .sum()
    }

    /// Mark every transitive operand of `root` as exact. The walk does not continue past loads,
    /// but records their addresses. Returns the number of newly marked instructions.
    pub fn mark_dependencies(
        &self,
        root: InsnId,
        marks: &mut Marks,
        addresses: &mut AddressSet,
    ) -> usize {
        let mut newly_marked = 0;
        // Visited set for this root only
        let mut visited: UnorderedSet<InsnId> = UnorderedSet::new();
        visited.insert(root);
        let mut stack: Vec<(InsnId, usize)> = vec![(root, 0)];

        while let Some((id, depth)) = stack.pop() {
            let ins = self.func.instruction(id);
            // The stored value is data, not part of what it takes to perform the store
            let skip = if ins.op == Op::Store { 1 } else { 0 };
            for operand in ins.operands.iter().skip(skip) {
                let (opid, opins) = match self.func.as_instruction(operand) {
                    Some(x) => x,
                    None => continue,
                };
                if marks.mark(opid) {
                    newly_marked += 1;
                    trace!(
                        "Marked exact";
                        "insn" => %self.func.display_instruction(opid),
                        "depth" => depth + 1,
                        "root" => ?root,
                    );
                }
                if opins.op == Op::Load {
                    if let Some(address) = opins.address_operand() {
                        addresses.record(self.oracle, address);
                    }
                } else if visited.insert(opid) {
                    stack.push((opid, depth + 1));
                }
            }
        }

        newly_marked
    }
}
