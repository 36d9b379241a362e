//! Graphviz export of rooted diagram DAGs.

use std::collections::BTreeMap;

use crate::aadd::{Aadd, AaddNode};
use crate::add::Add;
use crate::types::NodeId;

impl Add {
    /// Render the DAG below `roots` as a DOT digraph.
    ///
    /// Nodes are ranked by level, low edges are dashed, terminals are value
    /// boxes on the sink rank.
    pub fn to_dot(&self, roots: &[NodeId]) -> Result<String, std::fmt::Error> {
        use std::fmt::Write as _;

        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        writeln!(dot, "node [shape=circle, fixedsize=true];")?;

        let all_nodes = self.descendants(roots.iter().copied());

        // Nodes per level
        let mut levels = BTreeMap::<usize, Vec<NodeId>>::new();
        let mut terminals = Vec::new();
        for &id in all_nodes.iter() {
            if self.is_terminal(id) {
                terminals.push(id);
            } else {
                levels.entry(self.level(id)).or_default().push(id);
            }
        }

        for level in levels.values() {
            writeln!(dot, "{{ rank=same")?;
            for &id in level.iter() {
                let label = format!("<x<SUB>{}</SUB>>", self.var(id).id());
                writeln!(dot, "{} [label={}];", id.id(), label)?;
            }
            writeln!(dot, "}}")?;
        }

        // Terminals
        writeln!(dot, "{{ rank=sink")?;
        for &id in terminals.iter() {
            writeln!(
                dot,
                "{} [shape=square, label=\"{}\"];",
                id.id(),
                self.terminal_value(id)
            )?;
        }
        writeln!(dot, "}}")?;

        // Edges
        for &id in all_nodes.iter() {
            if self.is_terminal(id) {
                continue;
            }
            writeln!(dot, "{} -> {};", id.id(), self.high(id).id())?;
            writeln!(dot, "{} -> {} [style=dashed];", id.id(), self.low(id).id())?;
        }

        // Roots
        writeln!(dot, "{{ rank=source")?;
        for (i, root) in roots.iter().enumerate() {
            writeln!(dot, "r{} [shape=rect, label=\"{}\"];", i, root)?;
        }
        writeln!(dot, "}}")?;
        for (i, &root) in roots.iter().enumerate() {
            writeln!(dot, "r{} -> {};", i, root.id())?;
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

impl Aadd {
    /// Render the DAG below the given references as a DOT digraph.
    ///
    /// Every edge shows its affine pair `<c, b>`; the root boxes carry the
    /// external reference factors.
    pub fn to_dot(&self, roots: &[NodeId]) -> Result<String, std::fmt::Error> {
        use std::fmt::Write as _;

        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        writeln!(dot, "node [shape=circle, fixedsize=true];")?;

        let root_nodes: Vec<NodeId> = roots.iter().map(|&r| self.reference(r).node).collect();
        let all_nodes = self.descendant_nodes(root_nodes.iter().copied());

        let mut levels = BTreeMap::<usize, Vec<NodeId>>::new();
        for &id in all_nodes.iter() {
            if let AaddNode::Internal { var, .. } = self.node(id) {
                levels
                    .entry(self.order().level(var))
                    .or_default()
                    .push(id);
            }
        }

        for level in levels.values() {
            writeln!(dot, "{{ rank=same")?;
            for &id in level.iter() {
                if let AaddNode::Internal { var, .. } = self.node(id) {
                    let label = format!("<x<SUB>{}</SUB>>", var.id());
                    writeln!(dot, "{} [label={}];", id.id(), label)?;
                }
            }
            writeln!(dot, "}}")?;
        }

        writeln!(dot, "{{ rank=sink")?;
        writeln!(
            dot,
            "{} [shape=square, label=\"T\"];",
            self.terminal_node().id()
        )?;
        writeln!(dot, "}}")?;

        for &id in all_nodes.iter() {
            if let AaddNode::Internal { low, high, .. } = self.node(id) {
                writeln!(
                    dot,
                    "{} -> {} [label=\"<{}, {}>\"];",
                    id.id(),
                    high.target.id(),
                    high.c,
                    high.b
                )?;
                writeln!(
                    dot,
                    "{} -> {} [label=\"<{}, {}>\", style=dashed];",
                    id.id(),
                    low.target.id(),
                    low.c,
                    low.b
                )?;
            }
        }

        writeln!(dot, "{{ rank=source")?;
        for (i, &root) in roots.iter().enumerate() {
            let r = self.reference(root);
            writeln!(
                dot,
                "r{} [shape=rect, label=\"<{}, {}>\"];",
                i, r.c, r.b
            )?;
        }
        writeln!(dot, "}}")?;
        for (i, &root) in roots.iter().enumerate() {
            writeln!(dot, "r{} -> {};", i, self.reference(root).node.id())?;
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BinOp;
    use crate::order::VarOrder;
    use crate::types::VarId;

    #[test]
    fn test_add_dot_contains_terminals_and_edges() {
        let mut add = Add::new(VarOrder::numbered(2));
        let x = add.get_var_node(VarId::new(1), 0.0, 1.0);
        let y = add.get_var_node(VarId::new(2), 0.0, 2.0);
        let f = add.apply(x, y, BinOp::Sum);

        let dot = add.to_dot(&[f]).unwrap();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("shape=square"));
        assert!(dot.contains("style=dashed"));
        assert!(dot.contains("rank=source"));
    }

    #[test]
    fn test_aadd_dot_labels_edges() {
        let mut aadd = Aadd::new(VarOrder::numbered(2));
        let x = aadd.get_var_node(VarId::new(1), 0.0, 1.0);
        let y = aadd.get_var_node(VarId::new(2), 0.0, 2.0);
        let f = aadd.apply(x, y, BinOp::Sum);

        let dot = aadd.to_dot(&[f]).unwrap();
        assert!(dot.contains("label=\"T\""));
        // The indicator node of x2 keeps its constant edges <0, 0> / <0, 1>.
        assert!(dot.contains("<0, 1>"));
        // The root box shows the external reference factors.
        assert!(dot.contains("<3, 0>"));
    }
}
