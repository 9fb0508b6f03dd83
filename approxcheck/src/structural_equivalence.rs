//! Structural equivalence of values, used in place of a real alias analysis.
//!
//! Two instructions are taken to denote the same value (and thus, for pointers, the same address)
//! when they perform the same operation at the same type over the same operands. This
//! under-approximates aliasing: locations reached through differently shaped computations are
//! never conflated.

use crate::containers::unordered::UnorderedSet;
use crate::il::{Function, InsnId, Instruction, Value};

/// Decides whether two values denote the same address.
pub trait AliasOracle {
    /// Whether `a` and `b` are taken to be the same address. With `deep`, operands are allowed to
    /// differ as long as they are themselves (recursively) equivalent.
    fn equivalent(&self, a: &Value, b: &Value, deep: bool) -> bool;
}

/// The opcode/type/operand comparison heuristic
pub struct StructuralEquivalence<'a> {
    func: &'a Function,
}

impl<'a> StructuralEquivalence<'a> {
    pub fn new(func: &'a Function) -> Self {
        Self { func }
    }

    /// Same opcode, same number of operands, same type. Comparison predicates are not compared.
    fn same_shape(a: &Instruction, b: &Instruction) -> bool {
        a.op == b.op && a.operands.len() == b.operands.len() && a.ty == b.ty
    }
}

impl AliasOracle for StructuralEquivalence<'_> {
    fn equivalent(&self, a: &Value, b: &Value, deep: bool) -> bool {
        if a == b {
            return true;
        }
        let (ida, idb) = match (a.as_instruction(), b.as_instruction()) {
            (Some(ida), Some(idb)) => (ida, idb),
            _ => return false,
        };
        let (ia, ib) = (self.func.instruction(ida), self.func.instruction(idb));
        if !Self::same_shape(ia, ib) {
            return false;
        }
        if ia.operands == ib.operands {
            return true;
        }
        if !deep {
            return false;
        }

        // Pairs already known to have the same shape, and assumed equivalent while their operands
        // are being compared. Assuming is what lets operand cycles through phis terminate.
        let mut assumed: UnorderedSet<(InsnId, InsnId)> = UnorderedSet::new();
        assumed.insert((ida, idb));
        let mut worklist: Vec<(InsnId, InsnId)> = vec![(ida, idb)];

        while let Some((x, y)) = worklist.pop() {
            let (ix, iy) = (self.func.instruction(x), self.func.instruction(y));
            for (ox, oy) in ix.operands.iter().zip(iy.operands.iter()) {
                if ox == oy {
                    continue;
                }
                let (px, py) = match (ox.as_instruction(), oy.as_instruction()) {
                    (Some(px), Some(py)) => (px, py),
                    _ => return false,
                };
                if assumed.contains(&(px, py)) {
                    continue;
                }
                let (jx, jy) = (self.func.instruction(px), self.func.instruction(py));
                if !Self::same_shape(jx, jy) {
                    return false;
                }
                assumed.insert((px, py));
                if jx.operands != jy.operands {
                    worklist.push((px, py));
                }
            }
        }

        true
    }
}
