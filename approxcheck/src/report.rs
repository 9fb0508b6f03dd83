//! Per-opcode approximability counts.

use crate::il::Function;
use crate::marks::Marks;

use std::collections::BTreeMap;

/// How many instructions of one opcode exist, and how many of those may be approximated
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct OpcodeCounts {
    pub total: usize,
    pub approximable: usize,
}

impl OpcodeCounts {
    pub fn exact(&self) -> usize {
        self.total - self.approximable
    }
}

impl std::ops::Add for OpcodeCounts {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            approximable: self.approximable + other.approximable,
        }
    }
}

/// Output format of a report
#[derive(clap::ArgEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReportFormat {
    /// `add: 3/4 can be approximated` lines under a banner
    Text,
    /// Aligned columns
    Table,
}

/// The approximability report of one function, keyed (and ordered) by opcode label
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApproximabilityReport {
    function: String,
    counts: BTreeMap<&'static str, OpcodeCounts>,
}

impl ApproximabilityReport {
    pub fn new(func: &Function, marks: &Marks) -> Self {
        let mut counts: BTreeMap<&'static str, OpcodeCounts> = BTreeMap::new();
        for (id, ins) in func.instructions() {
            let c = counts.entry(ins.op.label()).or_default();
            c.total += 1;
            if !marks.is_exact(id) {
                c.approximable += 1;
            }
        }
        Self {
            function: func.name().to_owned(),
            counts,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Counts for the opcode with the given label, if any instruction has it
    pub fn get(&self, label: &str) -> Option<OpcodeCounts> {
        self.counts.get(label).copied()
    }

    /// All counts, ordered by opcode label
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, OpcodeCounts)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }

    /// Counts over all opcodes
    pub fn totals(&self) -> OpcodeCounts {
        self.counts.values().fold(Default::default(), |a, b| a + *b)
    }

    pub fn display(&self, format: ReportFormat) -> DisplayReport<'_> {
        DisplayReport {
            report: self,
            format,
        }
    }
}

impl std::fmt::Display for ApproximabilityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.display(ReportFormat::Text))
    }
}

/// See [`ApproximabilityReport::display`]
pub struct DisplayReport<'a> {
    report: &'a ApproximabilityReport,
    format: ReportFormat,
}

impl std::fmt::Display for DisplayReport<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let r = self.report;
        match self.format {
            ReportFormat::Text => {
                writeln!(f)?;
                writeln!(
                    f,
                    "===================Function {}===================",
                    r.function
                )?;
                writeln!(f)?;
                for (op, c) in r.iter() {
                    writeln!(f, "{}: {}/{} can be approximated", op, c.approximable, c.total)?;
                }
                writeln!(f)
            }
            ReportFormat::Table => {
                let w = r.counts.keys().map(|k| k.len()).max().unwrap_or(0).max(6);
                writeln!(f, "Function {}", r.function)?;
                writeln!(
                    f,
                    "{:<w$}  {:>6}  {:>6}  {:>12}",
                    "opcode",
                    "total",
                    "exact",
                    "approximable",
                    w = w
                )?;
                let totals = r.totals();
                for (op, c) in r.iter().chain(std::iter::once(("(all)", totals))) {
                    writeln!(
                        f,
                        "{:<w$}  {:>6}  {:>6}  {:>12}",
                        op,
                        c.total,
                        c.exact(),
                        c.approximable,
                        w = w
                    )?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::InsnId;
    use crate::il_parser::lift_from;

    fn sample() -> ApproximabilityReport {
        let prog = lift_from(
            "define void @sample(i32 %a, i32* %p) {
               %x = add i32 %a, 1
               %y = add i32 %x, 2
               %g = getelementptr i32*, %p, %y
               store %x, %g
               ret void
             }",
        )
        .unwrap();
        let f = prog.function("sample").unwrap();
        let mut marks = Marks::new(f);
        marks.mark(InsnId(1));
        marks.mark(InsnId(2));
        ApproximabilityReport::new(f, &marks)
    }

    #[test]
    fn counts_per_opcode() {
        let r = sample();
        assert_eq!(
            r.get("add"),
            Some(OpcodeCounts {
                total: 2,
                approximable: 1
            })
        );
        assert_eq!(r.get("getelementptr").map(|c| c.exact()), Some(1));
        assert_eq!(r.get("load"), None);
        assert_eq!(
            r.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec!["add", "getelementptr", "ret", "store"]
        );
        assert_eq!(
            r.totals(),
            OpcodeCounts {
                total: 5,
                approximable: 3
            }
        );
    }

    #[test]
    fn text_format() {
        assert_eq!(
            sample().to_string(),
            "\n\
             ===================Function sample===================\n\
             \n\
             add: 1/2 can be approximated\n\
             getelementptr: 0/1 can be approximated\n\
             ret: 1/1 can be approximated\n\
             store: 1/1 can be approximated\n\
             \n"
        );
    }

    #[test]
    fn table_format() {
        let table = sample().display(ReportFormat::Table).to_string();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Function sample");
        assert_eq!(lines[1], "opcode          total   exact  approximable");
        assert_eq!(lines[2], "add                 2       1             1");
        assert_eq!(lines[6], "(all)               5       2             3");
    }
}
