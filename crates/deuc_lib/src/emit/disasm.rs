use crate::DeucError;
use crate::fold::symbol_name;
use crate::instr::{Instr, Operand};
use crate::node::FunctionNode;
use crate::types::slot_asm;

use super::pseudo::{RenderContext, function_name, process_type_name};

fn operand_to_string(ins: &Instr, ctx: &RenderContext<'_>) -> String {
    match &ins.operand {
        Operand::None => String::new(),
        Operand::Slot(s) => slot_asm(*s),
        Operand::Byte(v) => format!("{:02X}h", *v as u8),
        Operand::Word(v) => format!("{:04X}h", *v as u16),
        Operand::Dword(v) => format!("{:08X}h", v),
        Operand::Str(s) => format!("{:?}", String::from_utf8_lossy(s)),
        Operand::U8(v) => format!("{:02X}h", v),
        Operand::U16(line) => format!("{} ({:04X}h)", line, line),
        Operand::Calli { arg_bytes, intrinsic } => {
            let sig = ctx.names.intrinsic(*intrinsic).unwrap_or("?");
            format!("{:02X}h {:04X}h ; {}", arg_bytes, intrinsic, sig)
        }
        Operand::Global { offset, size } => match ctx.symbols.find(*offset as u32) {
            Some(g) => format!("[{:04X} {:02X}] ; {}", offset, size, g.name),
            None => format!("[{:04X} {:02X}]", offset, size),
        },
        Operand::Jump(_) | Operand::Foreach { .. } => {
            let target = ins.jump_target().unwrap_or(ins.offset);
            match &ins.operand {
                Operand::Foreach { slot, elem_size, .. } => {
                    format!("{} {:02X}h {:04X}h", slot_asm(*slot), elem_size, target)
                }
                _ => format!("{:04X}h", target),
            }
        }
        Operand::SymbolInfo { rel, name } => {
            let symbol = ins.offset + 3 + *rel as u32;
            format!("offset {:04X}h = \"{}\"", symbol, symbol_name(name))
        }
        Operand::Loop { slot, str_size, search_type } => {
            format!("{} {:02X}h {:02X}h", slot_asm(*slot), str_size, search_type)
        }
    }
}

pub fn render_disassembly(func: &FunctionNode, ctx: &RenderContext<'_>) -> Result<String, DeucError> {
    let instrs = super::stream(func)?;
    let mut out = String::new();
    out.push_str(&format!(
        "function {} (locals={}, process={}, startup={})\n",
        function_name(func),
        func.locals_size,
        process_type_name(func.process_type),
        func.is_startup
    ));
    if let Some(event) = func.event {
        out.push_str(&format!("; event {:02X}: {}\n", event, ctx.names.event_name(event)));
    }
    out.push_str("bytecode:\n");

    for ins in &instrs {
        out.push_str(&format!("{:04X}: {:02X}  {:<18}", ins.offset, ins.opcode, ins.mnemonic()));
        out.push_str(&operand_to_string(ins, ctx));
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_instructions;
    use crate::fold::fold_function;
    use crate::instr::*;
    use crate::names::{NameTables, SymbolTable};

    #[test]
    fn lists_bracketing_markers_and_operands() {
        let code = [
            OP_INIT, 0x02,
            OP_PUSH_WORD, 0x00, 0x00,
            OP_PUSH_LOCAL_DWORD, 0x06,
            OP_PUSH_INDIRECT, 0x04,
            OP_SET_INFO,
            OP_PROC_EXCLUDE,
            OP_PUSH_BYTE, 0x03,
            OP_POP_GLOBAL, 0x10, 0x00, 0x02,
            OP_RET,
            OP_END,
        ];
        let func = fold_function(decode_instructions(&code).unwrap(), true).unwrap();
        let symbols = SymbolTable::parse("0x10 2 gotKey").unwrap();
        let ctx = RenderContext::new(NameTables::u8(), &symbols);
        let out = render_disassembly(&func, &ctx).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "function class_0000_function_0000 (locals=2, process=PT_DEFAULT, startup=true)");
        assert_eq!(lines[1], "bytecode:");
        assert_eq!(lines[2], "0000: 5A  init              02h");
        assert_eq!(lines[3], "0002: 0B  push              0000h");
        assert_eq!(lines[4], "0005: 40  push dword        [BP+06h]");
        assert_eq!(lines[7], "000A: 78  process exclude   ");
        assert_eq!(lines[9], "000D: 4F  pop global        [0010 02] ; gotKey");
        assert_eq!(lines[10], "0011: 50  ret               ");
        assert_eq!(lines[11], "0012: 7A  end               ");
        assert_eq!(lines.len(), 12);
    }

    #[test]
    fn jumps_show_absolute_targets() {
        let symbols = SymbolTable::new();
        let ctx = RenderContext::new(NameTables::u8(), &symbols);
        let jne = Instr::new(0x10, OP_JNE, Operand::Jump(4));
        assert_eq!(operand_to_string(&jne, &ctx), "0017h");
        let each = Instr::new(0x20, OP_FOREACH_LIST, Operand::Foreach { slot: -2, elem_size: 2, rel: 3 });
        assert_eq!(operand_to_string(&each, &ctx), "[BP-02h] 02h 0028h");
        let call = Instr::new(0, OP_CALLI, Operand::Calli { arg_bytes: 4, intrinsic: 0x0B });
        assert_eq!(operand_to_string(&call, &ctx), "04h 000Bh ; void Item::setFrame(uword frame)");
    }
}
