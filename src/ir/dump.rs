//! Text and DOT renderings of a graph.

use std::fmt::{self, Write};

use crate::{
    ir::{BlockFlags, BlockId, DataType, Graph, InstData, Instruction},
    utils::escape_dot,
};

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_dst() {
            write!(f, "{} = ", self.id)?;
        }
        write!(f, "{}", self.opcode)?;
        if self.ty != DataType::Void {
            write!(f, ".{}", self.ty)?;
        }
        match &self.data {
            InstData::None => {}
            InstData::Constant(value) => write!(f, " {value}")?,
            InstData::Parameter(index) => write!(f, " arg{index}")?,
            InstData::Condition(cc) => write!(f, " {cc}")?,
            InstData::ConditionImm { cc, imm } => write!(f, " {cc} {imm}")?,
            InstData::Intrinsic(id) => write!(f, " {id:?}")?,
            InstData::Call(method) => write!(f, " m{method}")?,
            InstData::Field(field) => write!(f, " f{field}")?,
            InstData::Throw(Some(ty)) => write!(f, " t{ty}")?,
            InstData::Throw(None) => {}
            InstData::Try(types) => write!(f, " {} handler(s)", types.len())?,
            InstData::SaveState(_) => {}
            InstData::SpillFill { kind, moves } => {
                write!(f, " {kind}")?;
                for (i, mv) in moves.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{} -> {}", mv.src, mv.dst)?;
                }
            }
        }
        for (i, input) in self.inputs.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match (&self.data, self.throwers.get(i)) {
                (InstData::SaveState(vregs), _) if i < vregs.len() => {
                    write!(f, "{sep}{input}(r{})", vregs[i])?;
                }
                (_, Some(thrower)) => write!(f, "{sep}{input}@{thrower}")?,
                _ => write!(f, "{sep}{input}")?,
            }
        }
        Ok(())
    }
}

impl Graph {
    /// Renders the graph as text, one block after the other in arena order.
    ///
    /// ```text
    /// bb1 preds: [bb0, bb2] succs: [bb2, bb3] loop: L1
    ///     v3 = Phi.Int64 v0, v5
    ///     v4 = Compare.Bool Lt v3, v1
    ///     IfImm Ne 0 v4
    /// ```
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for block in self.blocks() {
            let b = self.block(block);
            let _ = write!(
                out,
                "{block} preds: {:?} succs: {:?}",
                b.preds(),
                b.succs()
            );
            if let Some(lp) = b.loop_id() {
                let _ = write!(out, " loop: {lp}");
            }
            if let Some(try_id) = b.try_id() {
                let _ = write!(out, " try: {try_id}");
            }
            let flags = b.flags() - BlockFlags::NEEDS_JUMP;
            if !flags.is_empty() {
                let _ = write!(out, " {flags:?}");
            }
            out.push('\n');
            for inst in self.all_insts(block) {
                let _ = writeln!(out, "    {}", self.inst(inst));
            }
        }
        out
    }

    /// Renders the CFG in Graphviz DOT format.
    ///
    /// Every block becomes a box listing its instructions; conditional edges are labelled
    /// `true`/`false` and edges into catch-begin blocks are dashed. The start block is
    /// filled green and the end block red.
    ///
    /// # Arguments
    ///
    /// * `title` - Optional graph label.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph CFG {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"{}\";", escape_dot(name));
        }
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        for block in self.blocks() {
            let b = self.block(block);
            let mut label = format!("{block}");
            if let Some(lp) = b.loop_id() {
                let _ = write!(label, " ({lp})");
            }
            label.push_str("\\l");
            for inst in self.all_insts(block) {
                let _ = write!(label, "{}\\l", escape_dot(&self.inst(inst).to_string()));
            }
            let style = if b.is_start() {
                ", style=filled, fillcolor=lightgreen"
            } else if b.is_end() {
                ", style=filled, fillcolor=lightcoral"
            } else if b.is_catch_begin() {
                ", style=filled, fillcolor=lightyellow"
            } else {
                ""
            };
            let _ = writeln!(dot, "    {block} [label=\"{label}\"{style}];");
        }

        dot.push('\n');

        for block in self.blocks() {
            let conditional = self.is_conditional(block);
            for (index, &succ) in self.block(block).succs().iter().enumerate() {
                let mut attrs = Vec::new();
                if conditional {
                    attrs.push(if index == 0 { "label=\"true\"" } else { "label=\"false\"" });
                }
                if self.block(succ).is_catch_begin() {
                    attrs.push("style=dashed");
                }
                if attrs.is_empty() {
                    let _ = writeln!(dot, "    {block} -> {succ};");
                } else {
                    let _ = writeln!(dot, "    {block} -> {succ} [{}];", attrs.join(", "));
                }
            }
        }

        dot.push_str("}\n");
        dot
    }

    fn is_conditional(&self, block: BlockId) -> bool {
        self.block(block).succs().len() == 2
            && self
                .block(block)
                .last_inst()
                .is_some_and(|last| self.inst(last).opcode().is_conditional_branch())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ir::{
            builder::{GraphBuilder, EXIT},
            ConditionCode, DataType,
        },
        Result,
    };

    #[test]
    fn test_dump_lists_blocks_and_instructions() -> Result<()> {
        let built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            f.block(1, &[EXIT], |b| {
                let sum = b.add(x, one);
                b.ret(sum)
            })
        })?;
        let text = built.graph.dump();
        assert!(text.contains("Add.Int64"));
        assert!(text.contains("Return.Int64"));
        assert!(text.contains(&format!("{} preds: [", built.block(1))));
        Ok(())
    }

    #[test]
    fn test_to_dot_labels_conditional_edges() -> Result<()> {
        let built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let zero = f.int(0);
            f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, zero));
            f.block(2, &[EXIT], |b| b.ret(x));
            f.block(3, &[EXIT], |b| b.ret(zero));
        })?;
        let dot = built.graph.to_dot(Some("cond<T>"));
        assert!(dot.starts_with("digraph CFG {"));
        assert!(dot.contains("label=\"cond\\<T\\>\""));
        assert!(dot.contains(&format!("{} -> {} [label=\"true\"]", built.block(1), built.block(2))));
        assert!(dot.contains(&format!("{} -> {} [label=\"false\"]", built.block(1), built.block(3))));
        assert!(dot.contains("fillcolor=lightgreen"));
        assert!(dot.trim_end().ends_with('}'));
        Ok(())
    }
}
