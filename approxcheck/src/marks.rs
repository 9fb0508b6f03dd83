//! Per-run classification of instructions.

use crate::il::{Function, InsnId};

/// Classification of a single instruction
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub enum Mark {
    /// Not (yet) known to need exact semantics; a candidate for approximation
    #[default]
    Unmarked,
    /// Precision-sensitive; must not be approximated
    Exact,
}

/// The mark of every instruction of one function. Marks only ever escalate from
/// [`Mark::Unmarked`] to [`Mark::Exact`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Marks {
    marks: Vec<Mark>,
    exact: usize,
}

impl Marks {
    /// Everything unmarked, sized for `func`
    pub fn new(func: &Function) -> Self {
        Self {
            marks: vec![Mark::Unmarked; func.len()],
            exact: 0,
        }
    }

    pub fn get(&self, id: InsnId) -> Mark {
        match self.marks.get(id.index()) {
            Some(m) => *m,
            None => panic!(
                "Dangling instruction reference {:?} when reading marks of {} instructions",
                id,
                self.marks.len()
            ),
        }
    }

    pub fn is_exact(&self, id: InsnId) -> bool {
        self.get(id) == Mark::Exact
    }

    /// Mark `id` as exact, returning whether it was not already
    pub fn mark(&mut self, id: InsnId) -> bool {
        let len = self.marks.len();
        let m = self.marks.get_mut(id.index()).unwrap_or_else(|| {
            panic!(
                "Dangling instruction reference {:?} when marking among {} instructions",
                id, len
            )
        });
        if *m == Mark::Exact {
            false
        } else {
            *m = Mark::Exact;
            self.exact += 1;
            true
        }
    }

    /// Ids of all exact instructions, in id order
    pub fn exact(&self) -> impl Iterator<Item = InsnId> + '_ {
        self.marks
            .iter()
            .enumerate()
            .filter(|(_, m)| **m == Mark::Exact)
            .map(|(i, _)| InsnId(i))
    }

    pub fn count_exact(&self) -> usize {
        self.exact
    }
}
