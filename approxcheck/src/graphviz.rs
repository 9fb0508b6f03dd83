//! GraphViz output of an analysed function's def-use graph.

use crate::analysis::ApproximabilityAnalysis;
use crate::il::{InsnId, Value};

type Node = InsnId;
/// Def to use, with the operand position
type Edge = (InsnId, InsnId, usize);

struct Graph<'a, 'b> {
    analysis: &'b ApproximabilityAnalysis<'a>,
}

impl<'a, 'b> dot::Labeller<'b, Node, Edge> for Graph<'a, 'b> {
    fn graph_id(&'b self) -> dot::Id<'b> {
        dot::Id::new("Approximability").unwrap()
    }
    fn node_id(&'b self, n: &Node) -> dot::Id<'b> {
        dot::Id::new(format!("i{}", n.index())).unwrap()
    }
    fn node_label<'c>(&'c self, n: &Node) -> dot::LabelText<'c> {
        let func = self.analysis.function();
        let mut label = format!("{}", func.display_instruction(*n));
        let tracked = Value::Instruction(*n);
        if self.analysis.address_set().all().any(|a| *a == tracked) {
            label.push_str("\n(tracked address)");
        }
        dot::LabelText::label(label)
    }
    fn node_style(&'b self, n: &Node) -> dot::Style {
        if self.analysis.is_exact(*n) {
            dot::Style::Filled
        } else {
            dot::Style::None
        }
    }
    fn edge_label<'c>(&'c self, e: &Edge) -> dot::LabelText<'c> {
        dot::LabelText::label(format!("{}", e.2))
    }
}

impl<'a, 'b> dot::GraphWalk<'b, Node, Edge> for Graph<'a, 'b> {
    fn nodes(&self) -> dot::Nodes<'b, Node> {
        self.analysis
            .function()
            .instruction_ids()
            .collect::<Vec<_>>()
            .into()
    }
    fn edges(&'b self) -> dot::Edges<'b, Edge> {
        let func = self.analysis.function();
        let mut edges: Vec<Edge> = vec![];
        for (id, ins) in func.instructions() {
            for (pos, v) in ins.operands.iter().enumerate() {
                if let Value::Instruction(def) = v {
                    edges.push((*def, id, pos));
                }
            }
        }
        edges.into()
    }
    fn source(&self, e: &Edge) -> Node {
        e.0
    }
    fn target(&self, e: &Edge) -> Node {
        e.1
    }
}

impl<'a> ApproximabilityAnalysis<'a> {
    /// Write the def-use graph as a `.dot` document; exact instructions are filled
    pub fn write_dot<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        dot::render(&Graph { analysis: self }, w)
    }

    /// Generate a `.dot` document of the def-use graph
    pub fn generate_dot(&self) -> String {
        let mut s: Vec<u8> = vec![];
        self.write_dot(&mut s).unwrap();
        String::from_utf8(s).unwrap()
    }
}

#[cfg(test)]
mod test {
    use crate::analysis::ApproximabilityAnalysis;
    use crate::analysis_config::AnalysisConfig;
    use crate::il_parser::lift_from;

    #[test]
    fn exact_nodes_are_filled() {
        let prog = lift_from(
            "define void @f(i32 %a, i32* %p) {
               %x = add i32 %a, 1
               %y = mul i32 %a, 2
               %g = getelementptr i32*, %p, %x
               store %y, %g
               ret void
             }",
        )
        .unwrap();
        let analysis = ApproximabilityAnalysis::analyze_with_config(
            prog.function("f").unwrap(),
            &AnalysisConfig::default(),
        );
        let dot = analysis.generate_dot();
        assert!(dot.starts_with("digraph Approximability {"));
        assert!(dot.contains("i0[label=\"%x = add i32 %a, 1\"][style=\"filled\"]"));
        assert!(dot.contains("i1[label=\"%y = mul i32 %a, 2\"];"));
        assert!(dot.contains("i0 -> i2[label=\"1\"];"));
        assert!(dot.contains("i1 -> i3[label=\"0\"];"));
    }
}
