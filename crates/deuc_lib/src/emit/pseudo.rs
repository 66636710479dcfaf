use crate::DeucError;
use crate::fold::symbol_name;
use crate::instr::mnemonic;
use crate::names::{NameTables, SymbolTable};
use crate::node::*;
use crate::types::{DataType, PopTarget, slot_name};

#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub names: NameTables<'a>,
    pub symbols: &'a SymbolTable,
    pub debug_comments: bool,
}

impl<'a> RenderContext<'a> {
    pub fn new(names: NameTables<'a>, symbols: &'a SymbolTable) -> Self {
        Self { names, symbols, debug_comments: true }
    }

    fn global(&self, offset: u16) -> String {
        match self.symbols.find(offset as u32) {
            Some(g) => g.name.clone(),
            None => format!("global_{:04X}", offset),
        }
    }
}

pub fn process_type_name(process_type: u16) -> String {
    match process_type {
        0x0000 => "PT_DEFAULT".to_string(),
        0x00F0 => "PT_ANIM".to_string(),
        pt => format!("PT_{:04X}", pt),
    }
}

pub fn function_name(func: &FunctionNode) -> String {
    match func.class_name.as_deref() {
        Some(class) if !class.is_empty() => format!("{}::{:04X}", class, func.start_offset),
        _ => format!("class_{:04X}_function_{:04X}", func.class_id, func.start_offset),
    }
}

fn header_line(func: &FunctionNode) -> String {
    if func.is_startup {
        "startup".to_string()
    } else if func.has_procexclude {
        format!("process [[{}, referent]] {}()", process_type_name(func.process_type), function_name(func))
    } else {
        format!("{}()", function_name(func))
    }
}

pub fn render_pseudocode(func: &FunctionNode, ctx: &RenderContext<'_>) -> Result<String, DeucError> {
    if let Some(missing) = func.missing_marker() {
        return Err(DeucError::IncompleteFunction { offset: func.start_offset, missing });
    }
    let mut out = String::new();
    if ctx.debug_comments {
        out.push_str("/*\n");
        out.push_str(&format!("  Function Start Offset: 0x{:04X}\n", func.start_offset));
        out.push_str(&format!("  Locals Datasize:       0x{:02X}\n", func.locals_size));
        out.push_str(&format!("  Process Type:          0x{:04X}\n", func.process_type));
        out.push_str("*/\n");
    }
    if let Some(event) = func.event {
        out.push_str(&format!("// event {:02X}: {}\n", event, ctx.names.event_name(event)));
    }
    out.push_str(&header_line(func));
    out.push_str("\n{\n");
    out.push_str(&nodes_to_string(&func.body, 2, ctx));
    out.push_str("}\n");
    Ok(out)
}

fn nodes_to_string(nodes: &[Node], indent: usize, ctx: &RenderContext<'_>) -> String {
    let mut out = String::new();
    for n in nodes {
        out.push_str(&node_to_string(n, indent, ctx));
    }
    out
}

fn block(head: &str, body: &[Node], indent: usize, ctx: &RenderContext<'_>) -> String {
    let pad = " ".repeat(indent);
    let mut out = format!("{pad}{head} {{\n");
    out.push_str(&nodes_to_string(body, indent + 2, ctx));
    out.push_str(&format!("{pad}}}\n"));
    out
}

fn node_to_string(n: &Node, indent: usize, ctx: &RenderContext<'_>) -> String {
    let pad = " ".repeat(indent);
    match &n.kind {
        NodeKind::LineNumber { line } => {
            if ctx.debug_comments {
                format!("{pad}/*{}*/\n", line)
            } else {
                String::new()
            }
        }
        NodeKind::SymbolInfo { rel, name } => {
            if ctx.debug_comments {
                let symbol = n.offset + 3 + *rel as u32;
                format!("{pad}symbol_info_NOPRINT(0x{:04X}, \"{}\")\n", symbol, symbol_name(name))
            } else {
                String::new()
            }
        }
        NodeKind::Suspend => format!("{pad}suspend;\n"),
        NodeKind::Init { .. }
        | NodeKind::Ret
        | NodeKind::ProcExclude
        | NodeKind::SetInfo(_)
        | NodeKind::LoopScript { .. } => format!("{pad}/* {} */\n", mnemonic(n.opcode() as u8)),
        NodeKind::Pop { target, value, .. } => {
            let value = expr(value, ctx);
            match target {
                PopTarget::LocalByte(s) | PopTarget::LocalWord(s) | PopTarget::LocalDword(s) => {
                    format!("{pad}{} = {};\n", slot_name(*s), value)
                }
                PopTarget::Global { offset, .. } => format!("{pad}{} = {};\n", ctx.global(*offset), value),
                PopTarget::Temp => format!("{pad}{};\n", value),
            }
        }
        NodeKind::Push(_)
        | NodeKind::BinOp { .. }
        | NodeKind::Not { .. }
        | NodeKind::PushIndirect { .. }
        | NodeKind::Calli { .. }
        | NodeKind::RetVal { .. } => format!("{pad}{};\n", expr(n, ctx)),
        NodeKind::Jmp { target } => format!("{pad}goto 0x{:04X};\n", target),
        NodeKind::If(i) => if_to_string(i, indent, ctx),
        NodeKind::Loop(l) => {
            let script = l.script.iter().map(|t| format!("0x{:02X}", t.token)).collect::<Vec<_>>().join(", ");
            let head = format!(
                "for ({} in search(0x{:02X}, {}, {{ {} }}))",
                slot_name(l.slot),
                l.search_type,
                l.str_size,
                script
            );
            block(&head, &l.body, indent, ctx)
        }
        NodeKind::Foreach(f) => {
            let kind = match f.kind {
                ForeachKind::List => "list",
                ForeachKind::SList => "slist",
            };
            let head = format!("foreach {} ({} in {})", kind, slot_name(f.slot), expr(&f.list, ctx));
            block(&head, &f.body, indent, ctx)
        }
        NodeKind::Switch(s) => {
            let mut out = format!("{pad}switch ({}) {{\n", expr(&s.discriminant, ctx));
            let case_pad = " ".repeat(indent + 2);
            for case in &s.cases {
                match &case.value {
                    Some(v) => out.push_str(&format!("{case_pad}case {}:\n", expr(v, ctx))),
                    None => out.push_str(&format!("{case_pad}default:\n")),
                }
                out.push_str(&nodes_to_string(&case.body, indent + 4, ctx));
            }
            out.push_str(&format!("{pad}}}\n"));
            out
        }
        NodeKind::Function(f) => format!("{pad}/* {}() */\n", function_name(f)),
    }
}

fn if_to_string(i: &IfNode, indent: usize, ctx: &RenderContext<'_>) -> String {
    let cond = i.cond.as_deref().map(|c| expr(c, ctx)).unwrap_or_default();
    match i.kind {
        IfKind::If | IfKind::ElseIf => block(&format!("if ({})", cond), &i.body, indent, ctx),
        IfKind::Else => {
            // fold guarantees an else-if continuation is the first child
            if let Some(Node { kind: NodeKind::If(inner @ IfNode { kind: IfKind::ElseIf, .. }), .. }) = i.body.first() {
                let inner_cond = inner.cond.as_deref().map(|c| expr(c, ctx)).unwrap_or_default();
                let mut out = block(&format!("else if ({})", inner_cond), &inner.body, indent, ctx);
                out.push_str(&nodes_to_string(&i.body[1..], indent, ctx));
                out
            } else {
                block("else", &i.body, indent, ctx)
            }
        }
    }
}

fn operand(n: &Node, ctx: &RenderContext<'_>) -> String {
    match n.kind {
        NodeKind::BinOp { .. } => format!("({})", expr(n, ctx)),
        _ => expr(n, ctx),
    }
}

pub fn expr(n: &Node, ctx: &RenderContext<'_>) -> String {
    match &n.kind {
        NodeKind::Push(d) => match d {
            DataType::Byte(v) => v.to_string(),
            DataType::Word(v) => v.to_string(),
            DataType::Dword(v) => format!("0x{:08X}", v),
            DataType::Str(s) => format!("{:?}", String::from_utf8_lossy(s)),
            DataType::LocalByte(s) | DataType::LocalWord(s) | DataType::LocalDword(s) => slot_name(*s),
            DataType::Global { offset, .. } => ctx.global(*offset),
        },
        NodeKind::BinOp { op, lhs, rhs, .. } => {
            format!("{} {} {}", operand(lhs, ctx), op.symbol(), operand(rhs, ctx))
        }
        NodeKind::Not { value, .. } => format!("!{}", operand(value, ctx)),
        NodeKind::PushIndirect { ptr, .. } => format!("*{}", operand(ptr, ctx)),
        NodeKind::Calli { intrinsic, args, .. } => {
            let args = args.iter().map(|a| expr(a, ctx)).collect::<Vec<_>>().join(", ");
            format!("{}({})", ctx.names.intrinsic_name(*intrinsic), args)
        }
        NodeKind::RetVal { call, .. } => expr(call, ctx),
        _ => format!("<{}>", mnemonic(n.opcode() as u8)),
    }
}
