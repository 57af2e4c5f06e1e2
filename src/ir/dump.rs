//! Textual and Graphviz renderings of a graph.
//!
//! The text form is what the pass manager logs after each pass when dumps
//! are enabled:
//!
//! ```text
//! graph sum (AArch64):
//! bb0 (entry) -> [bb1]
//!   v0: i32 = Parameter[0]
//!   v1: i32 = Constant[1]
//!   v2: i32 = Add v0, v1
//!   v3: void = Return v2
//! bb1 (exit) <- [bb0]
//! ```

use std::fmt::{self, Write};

use crate::ir::{BasicBlock, Graph, Instruction, Opcode};

/// Escapes a string for use inside a DOT label.
#[must_use]
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('|', "\\|")
}

/// Immediate payload of an opcode, rendered for dumps.
fn immediates(opcode: &Opcode) -> Option<String> {
    let text = match opcode {
        Opcode::Parameter { index } => index.to_string(),
        Opcode::Constant { value } => value.to_string(),
        Opcode::Compare { cc } | Opcode::If { cc } => cc.to_string(),
        Opcode::LoadArray { volatile } | Opcode::StoreArray { volatile } if *volatile => {
            "volatile".to_string()
        }
        Opcode::LoadArrayI { index, volatile } | Opcode::StoreArrayI { index, volatile } => {
            if *volatile {
                format!("{index}, volatile")
            } else {
                index.to_string()
            }
        }
        Opcode::LoadObject {
            field,
            offset,
            volatile,
        }
        | Opcode::StoreObject {
            field,
            offset,
            volatile,
        } => {
            if *volatile {
                format!("f{}+{offset}, volatile", field.0)
            } else {
                format!("f{}+{offset}", field.0)
            }
        }
        Opcode::LoadArrayPairI { index } | Opcode::StoreArrayPairI { index } => index.to_string(),
        Opcode::LoadPairPart { part } => part.to_string(),
        Opcode::NewObject { class } => format!("class {class}"),
        Opcode::Call { method } => format!("method {method}"),
        Opcode::SafePoint { vregs } | Opcode::SaveState { vregs } => vregs
            .iter()
            .map(|r| format!("r{r}"))
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    Some(text)
}

fn write_inst(out: &mut impl Write, inst: &Instruction) -> fmt::Result {
    write!(out, "{}: {} = {}", inst.id(), inst.ty(), inst.opcode().name())?;
    if let Some(imm) = immediates(inst.opcode()) {
        write!(out, "[{imm}]")?;
    }
    for (k, input) in inst.inputs().iter().enumerate() {
        let sep = if k == 0 { " " } else { ", " };
        write!(out, "{sep}{input}")?;
    }
    Ok(())
}

fn write_block_header(out: &mut impl Write, graph: &Graph, block: &BasicBlock) -> fmt::Result {
    write!(out, "{}", block.id())?;
    if block.id() == graph.entry() {
        out.write_str(" (entry)")?;
    }
    if Some(block.id()) == graph.exit() {
        out.write_str(" (exit)")?;
    }
    if block.is_try() {
        out.write_str(" (try)")?;
    }
    if block.is_in_loop() {
        out.write_str(" (loop)")?;
    }
    if !block.preds().is_empty() {
        let preds: Vec<String> = block.preds().iter().map(ToString::to_string).collect();
        write!(out, " <- [{}]", preds.join(", "))?;
    }
    if !block.succs().is_empty() {
        let succs: Vec<String> = block.succs().iter().map(ToString::to_string).collect();
        write!(out, " -> [{}]", succs.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {} ({}):", self.name(), self.arch())?;
        for block in self.blocks() {
            write_block_header(f, self, block)?;
            writeln!(f)?;
            for &id in block.insts() {
                match self.get_inst(id) {
                    Some(inst) => {
                        f.write_str("  ")?;
                        write_inst(f, inst)?;
                        writeln!(f)?;
                    }
                    None => writeln!(f, "  {id}: <dead>")?,
                }
            }
        }
        Ok(())
    }
}

impl Graph {
    /// Renders the graph in the textual dump format.
    #[must_use]
    pub fn dump(&self) -> String {
        self.to_string()
    }

    /// Renders the control flow graph in Graphviz DOT format, one record node
    /// per block listing its instructions.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph IR {\n");
        let label = title.unwrap_or_else(|| self.name());
        let _ = writeln!(dot, "    label=\"{}\";", escape_dot(label));
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        for block in self.blocks() {
            let mut header = String::new();
            let _ = write_block_header(&mut header, self, block);
            let mut text = escape_dot(&header);
            text.push_str("\\l");
            for &id in block.insts() {
                if let Some(inst) = self.get_inst(id) {
                    let mut line = String::new();
                    let _ = write_inst(&mut line, inst);
                    text.push_str(&escape_dot(&line));
                    text.push_str("\\l");
                }
            }

            let style = if block.id() == self.entry() {
                ", style=filled, fillcolor=lightgreen"
            } else if Some(block.id()) == self.exit() {
                ", style=filled, fillcolor=lightcoral"
            } else {
                ""
            };
            let _ = writeln!(dot, "    {} [label=\"{text}\"{style}];", block.id());
        }

        dot.push('\n');
        for block in self.blocks() {
            let two_way = block.succs().len() == 2;
            for (k, succ) in block.succs().iter().enumerate() {
                let attrs = match (two_way, k) {
                    (true, 0) => " [label=\"T\", color=green]",
                    (true, _) => " [label=\"F\", color=red]",
                    _ => "",
                };
                let _ = writeln!(dot, "    {} -> {succ}{attrs};", block.id());
            }
        }

        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Arch,
        ir::{ConditionCode, DataType, GraphBuilder},
    };

    fn sample() -> Graph {
        GraphBuilder::new(Arch::AArch64)
            .with_name("sum<T>")
            .build_with(|f| {
                let mut arr = None;
                f.block(0, |b| {
                    let p = b.param(0, DataType::I32);
                    arr = Some(b.param(1, DataType::Reference));
                    let one = b.const_i32(1);
                    b.branch(ConditionCode::Lt, p, one, 1, 2);
                });
                let arr = arr.unwrap();
                f.block(1, |b| b.ret_void());
                f.block(2, |b| {
                    let v = b.load_array_i(DataType::I32, arr, 3);
                    b.ret(v);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_escape_dot() {
        assert_eq!(escape_dot("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_dot("List<T>"), "List\\<T\\>");
        assert_eq!(escape_dot("a\r\nb"), "a\\nb");
        assert_eq!(escape_dot("{x|y}"), "\\{x\\|y\\}");
    }

    #[test]
    fn test_text_dump() {
        let text = sample().dump();
        assert!(text.starts_with("graph sum<T> (AArch64):"));
        assert!(text.contains("bb0 (entry) -> [bb1, bb2]"));
        assert!(text.contains("v0: i32 = Parameter[0]"));
        assert!(text.contains("= If[lt] v0, v2"));
        assert!(text.contains("= LoadArrayI[3] v"));
        assert!(text.contains("(exit) <- [bb1, bb2]"));
    }

    #[test]
    fn test_dot_output() {
        let dot = sample().to_dot(None);
        assert!(dot.starts_with("digraph IR {"));
        assert!(dot.contains("label=\"sum\\<T\\>\""));
        assert!(dot.contains("bb0 -> bb1 [label=\"T\", color=green];"));
        assert!(dot.contains("bb0 -> bb2 [label=\"F\", color=red];"));
        assert!(dot.contains("fillcolor=lightgreen"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
