//! The set of addresses observed to be dereferenced by a load whose result must be exact.

use crate::containers::InsertionOrderedSet;
use crate::il::Value;
use crate::log::*;
use crate::structural_equivalence::AliasOracle;

/// Tracked addresses, deduplicated up to structural equivalence. Only grows.
#[derive(Clone, Debug)]
pub struct AddressSet {
    entries: InsertionOrderedSet<Value>,
    /// Whether membership uses deep (rather than shallow) equivalence
    deep: bool,
}

impl AddressSet {
    pub fn new(deep: bool) -> Self {
        Self {
            entries: InsertionOrderedSet::new(),
            deep,
        }
    }

    /// Record `address`, unless an equivalent address is already tracked. Returns whether the set
    /// grew.
    pub fn record(&mut self, oracle: &dyn AliasOracle, address: &Value) -> bool {
        if self.contains(oracle, address) {
            return false;
        }
        let (idx, _) = self.entries.insert(address.clone());
        debug!("Tracking address"; "address" => ?address, "index" => idx);
        true
    }

    /// Whether `v` is equivalent to some tracked address
    pub fn contains(&self, oracle: &dyn AliasOracle, v: &Value) -> bool {
        self.entries.iter().any(|e| oracle.equivalent(e, v, self.deep))
    }

    /// All tracked addresses, in the order they were first recorded
    pub fn all(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il_parser::lift_from;
    use crate::structural_equivalence::StructuralEquivalence;

    #[test]
    fn recording_is_idempotent_up_to_equivalence() {
        let prog = lift_from(
            "define void @f(i32** %pp) {
               %s1 = alloca i32*
               %s2 = alloca i32*
               %a = load i32*, %pp
               %b = load i32*, %pp
               %g1 = getelementptr i32*, %a, 1
               %g2 = getelementptr i32*, %b, 1
               %g3 = getelementptr i32*, %a, 2
               ret void
             }",
        )
        .unwrap();
        let f = prog.function("f").unwrap();
        let oracle = StructuralEquivalence::new(f);
        let ids: Vec<Value> = f.instructions().map(|(id, _)| id.into()).collect();
        let (s1, s2, g1, g2, g3) = (&ids[0], &ids[1], &ids[4], &ids[5], &ids[6]);

        let mut set = AddressSet::new(true);
        assert!(set.is_empty());
        assert!(set.record(&oracle, g1));
        assert!(!set.record(&oracle, g1));
        assert!(!set.record(&oracle, g2));
        assert_eq!(set.len(), 1);
        assert!(set.record(&oracle, g3));
        assert!(set.record(&oracle, s1));
        assert!(!set.record(&oracle, s2));
        assert_eq!(set.len(), 3);
        assert!(set.contains(&oracle, g2));
        assert_eq!(set.all().collect::<Vec<_>>(), vec![g1, g3, s1]);
    }

    #[test]
    fn parameters_and_globals_are_tracked_by_identity() {
        let prog = lift_from("define void @f(i32** %pp, i32** %qq) {\n  ret void\n}").unwrap();
        let oracle = StructuralEquivalence::new(prog.function("f").unwrap());
        let global = Value::Global("gp".into());

        let mut set = AddressSet::new(true);
        assert!(set.record(&oracle, &Value::Argument(0)));
        assert!(!set.record(&oracle, &Value::Argument(0)));
        assert!(set.record(&oracle, &global));
        assert!(!set.record(&oracle, &global));
        assert!(set.contains(&oracle, &global));
        assert!(!set.contains(&oracle, &Value::Argument(1)));
        assert!(!set.contains(&oracle, &Value::Global("other".into())));
        assert_eq!(set.len(), 2);
    }
}
