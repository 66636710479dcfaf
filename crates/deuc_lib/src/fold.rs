//! Linear-to-tree folding.
//!
//! Instructions are fed in stream order. Each one either becomes a node on the
//! tail of the stack or is absorbed into a node already there; value operators
//! pop their operands from the tail. Conditionals and loops stay open on the
//! stack until the instruction that closes them arrives, at which point every
//! node above them becomes their body. The return marker triggers the function
//! fold, which drains the whole stack into a single [`FunctionNode`].

use std::collections::VecDeque;

use tracing::debug;

use crate::DeucError;
use crate::instr::*;
use crate::node::*;
use crate::switch::collapse_switches;
use crate::types::{DataType, PopTarget, Type};

pub struct FoldStack {
    nodes: VecDeque<Node>,
    collapse: bool,
    class_name: Option<String>,
    debug_offset: Option<u32>,
}

impl Default for FoldStack {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FoldStack {
    pub fn new(collapse_switches: bool) -> Self {
        Self {
            nodes: VecDeque::new(),
            collapse: collapse_switches,
            class_name: None,
            debug_offset: None,
        }
    }

    pub fn debug_offset(&self) -> Option<u32> {
        self.debug_offset
    }

    pub fn fold(&mut self, ins: Instr) -> Result<(), DeucError> {
        self.close_conditionals(ins.offset)?;

        let at = ins.offset;
        let op = ins.opcode;
        let target = ins.jump_target().ok_or(DeucError::InvalidJump { offset: at });
        match ins.operand {
            Operand::Slot(slot) if matches!(op, OP_POP_BYTE | OP_POP_WORD | OP_POP_DWORD) => {
                let target = match op {
                    OP_POP_BYTE => PopTarget::LocalByte(slot),
                    OP_POP_WORD => PopTarget::LocalWord(slot),
                    _ => PopTarget::LocalDword(slot),
                };
                self.push_pop(at, op, target)?;
            }
            Operand::Slot(slot) => {
                let data = match op {
                    OP_PUSH_LOCAL_BYTE => DataType::LocalByte(slot),
                    OP_PUSH_LOCAL_WORD => DataType::LocalWord(slot),
                    _ => DataType::LocalDword(slot),
                };
                self.push(Node::new(at, NodeKind::Push(data)));
            }
            Operand::Byte(v) => self.push(Node::new(at, NodeKind::Push(DataType::Byte(v)))),
            Operand::Word(v) => self.push(Node::new(at, NodeKind::Push(DataType::Word(v)))),
            Operand::Dword(v) => self.push(Node::new(at, NodeKind::Push(DataType::Dword(v)))),
            Operand::Str(s) => self.push(Node::new(at, NodeKind::Push(DataType::Str(s)))),
            Operand::Global { offset, size } => {
                if op == OP_POP_GLOBAL {
                    self.push_pop(at, op, PopTarget::Global { offset, size })?;
                } else {
                    self.push(Node::new(at, NodeKind::Push(DataType::Global { offset, size })));
                }
            }
            Operand::Calli { arg_bytes, intrinsic } => self.fold_calli(at, arg_bytes, intrinsic)?,
            Operand::U8(size) if op == OP_PUSH_INDIRECT => {
                let ptr = self.pop_typed(at, op, Type::Dword)?;
                let offset = ptr.offset;
                self.push(Node::new(offset, NodeKind::PushIndirect { at, size, ptr: Box::new(ptr) }));
            }
            Operand::U8(locals) if op == OP_INIT => self.push(Node::new(at, NodeKind::Init { locals })),
            Operand::U8(token) => self.push(Node::new(at, NodeKind::LoopScript { token })),
            Operand::U16(line) => self.push(Node::new(at, NodeKind::LineNumber { line })),
            Operand::Jump(_) => {
                let target = target?;
                if op == OP_JNE {
                    let cond = self.pop_value(at, op)?;
                    let offset = cond.offset;
                    let node = IfNode {
                        kind: IfKind::If,
                        at,
                        target,
                        cond: Some(Box::new(cond)),
                        body: Vec::new(),
                        open: true,
                    };
                    self.push(Node::new(offset, NodeKind::If(node)));
                } else {
                    self.push(Node::new(at, NodeKind::Jmp { target }));
                }
            }
            Operand::SymbolInfo { rel, name } => {
                self.debug_offset = Some(at + 3 + rel as u32);
                let class = symbol_name(&name);
                if !class.is_empty() {
                    self.class_name = Some(class);
                }
                self.push(Node::new(at, NodeKind::SymbolInfo { rel, name }));
            }
            Operand::Loop { slot, str_size, search_type } => {
                let mut script = Vec::new();
                while let Some(Node { offset, kind: NodeKind::LoopScript { token } }) = self.nodes.back() {
                    script.push(ScriptToken { offset: *offset, token: *token });
                    self.nodes.pop_back();
                }
                script.reverse();
                let offset = script.first().map(|t| t.offset).unwrap_or(at);
                let node = LoopNode {
                    at,
                    slot,
                    str_size,
                    search_type,
                    script,
                    body: Vec::new(),
                    next_offset: None,
                };
                self.push(Node::new(offset, NodeKind::Loop(node)));
            }
            Operand::Foreach { slot, elem_size, .. } => {
                let target = target?;
                let list = self.pop_value(at, op)?;
                let offset = list.offset;
                let node = ForeachNode {
                    at,
                    kind: if op == OP_FOREACH_LIST { ForeachKind::List } else { ForeachKind::SList },
                    slot,
                    elem_size,
                    target,
                    list: Box::new(list),
                    body: Vec::new(),
                    next_offset: None,
                };
                self.push(Node::new(offset, NodeKind::Foreach(node)));
            }
            Operand::None => self.fold_plain(at, op)?,
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<FunctionNode, DeucError> {
        let Some(last) = self.nodes.pop_back() else {
            return Err(DeucError::NoFunction);
        };
        let NodeKind::Function(func) = last.kind else {
            return Err(DeucError::MissingMarker {
                expected: "ret",
                opcode: last.opcode(),
                offset: last.offset,
            });
        };
        if !self.nodes.is_empty() {
            return Err(DeucError::StackNotEmpty { offset: func.start_offset, remaining: self.nodes.len() });
        }
        if let Some(missing) = func.missing_marker() {
            return Err(DeucError::IncompleteFunction { offset: func.start_offset, missing });
        }
        Ok(*func)
    }

    fn push(&mut self, node: Node) {
        self.nodes.push_back(node);
    }

    fn pop_value(&mut self, at: u32, op: u8) -> Result<Node, DeucError> {
        let node = self
            .nodes
            .pop_back()
            .ok_or(DeucError::EmptyStack { opcode: op as u16, offset: at })?;
        if !node.rtype().is_value() {
            return Err(DeucError::TypeMismatch {
                opcode: op as u16,
                offset: at,
                expected: "value",
                found: node.rtype(),
            });
        }
        Ok(node)
    }

    fn pop_typed(&mut self, at: u32, op: u8, expected: Type) -> Result<Node, DeucError> {
        let node = self.pop_value(at, op)?;
        if node.rtype() != expected {
            return Err(DeucError::TypeMismatch {
                opcode: op as u16,
                offset: at,
                expected: if expected == Type::Dword { "dword" } else { "word" },
                found: node.rtype(),
            });
        }
        Ok(node)
    }

    fn push_pop(&mut self, at: u32, op: u8, target: PopTarget) -> Result<(), DeucError> {
        let value = self.pop_value(at, op)?;
        let offset = value.offset;
        self.push(Node::new(offset, NodeKind::Pop { at, target, value: Box::new(value) }));
        Ok(())
    }

    fn fold_calli(&mut self, at: u32, arg_bytes: u8, intrinsic: u16) -> Result<(), DeucError> {
        let mut args = Vec::new();
        let mut taken = 0u32;
        while taken < arg_bytes as u32 {
            let arg = self.pop_value(at, OP_CALLI)?;
            taken += arg.rtype().stack_size();
            args.push(arg);
        }
        if taken != arg_bytes as u32 {
            return Err(DeucError::ArgumentMismatch { offset: at, arg_bytes });
        }
        args.reverse();
        let offset = args.first().map(|a| a.offset).unwrap_or(at);
        self.push(Node::new(offset, NodeKind::Calli { at, arg_bytes, intrinsic, args }));
        Ok(())
    }

    fn fold_plain(&mut self, at: u32, op: u8) -> Result<(), DeucError> {
        if let Some(binop) = BinOp::from_opcode(op) {
            let rhs = self.pop_value(at, op)?;
            let lhs = self.pop_value(at, op)?;
            let offset = lhs.offset;
            self.push(Node::new(offset, NodeKind::BinOp { at, op: binop, lhs: Box::new(lhs), rhs: Box::new(rhs) }));
            return Ok(());
        }
        match op {
            OP_NOT => {
                let value = self.pop_value(at, op)?;
                let offset = value.offset;
                self.push(Node::new(offset, NodeKind::Not { at, value: Box::new(value) }));
            }
            OP_POP_TEMP => self.push_pop(at, op, PopTarget::Temp)?,
            OP_RETVAL_WORD | OP_RETVAL_DWORD => {
                let call = match self.nodes.pop_back() {
                    Some(n @ Node { kind: NodeKind::Calli { .. }, .. }) => n,
                    Some(n) => {
                        return Err(DeucError::TypeMismatch {
                            opcode: op as u16,
                            offset: at,
                            expected: "intrinsic call",
                            found: n.rtype(),
                        });
                    }
                    None => return Err(DeucError::EmptyStack { opcode: op as u16, offset: at }),
                };
                let offset = call.offset;
                let dword = op == OP_RETVAL_DWORD;
                self.push(Node::new(offset, NodeKind::RetVal { at, dword, call: Box::new(call) }));
            }
            OP_SUSPEND => self.push(Node::new(at, NodeKind::Suspend)),
            OP_PROC_EXCLUDE => self.push(Node::new(at, NodeKind::ProcExclude)),
            OP_SET_INFO => {
                let this_ptr = self.pop_value(at, op)?;
                let process_type = self.pop_value(at, op)?;
                let offset = process_type.offset;
                let info = SetInfo { at, process_type: Box::new(process_type), this_ptr: Box::new(this_ptr) };
                self.push(Node::new(offset, NodeKind::SetInfo(info)));
            }
            OP_LOOPNEXT => self.close_loop(at)?,
            OP_RET => {
                self.push(Node::new(at, NodeKind::Ret));
                let func = self.fold_function()?;
                self.push(Node::new(func.start_offset, NodeKind::Function(Box::new(func))));
            }
            OP_END => {
                // the end marker is never pushed; it completes the function at the tail
                match self.nodes.back_mut() {
                    Some(Node { kind: NodeKind::Function(func), .. }) if func.end_offset.is_none() => {
                        func.end_offset = Some(at);
                    }
                    _ => return Err(DeucError::OrphanEnd { offset: at }),
                }
            }
            _ => return Err(DeucError::InvalidOpcode { offset: at, opcode: op }),
        }
        Ok(())
    }

    fn fold_function(&mut self) -> Result<FunctionNode, DeucError> {
        let ret = self.nodes.pop_back().ok_or(DeucError::NoFunction)?;
        let mut func = FunctionNode::new(ret.offset);

        let marker = self.nodes.iter().rposition(|n| matches!(n.kind, NodeKind::ProcExclude | NodeKind::SetInfo(_)));
        let Some(marker) = marker else {
            return Err(DeucError::MissingMarker { expected: "set info", opcode: ret.opcode(), offset: ret.offset });
        };
        let body = self.nodes.split_off(marker + 1);
        for node in body.iter().rev() {
            match &node.kind {
                NodeKind::Loop(_) | NodeKind::Foreach(_) if node.is_open() => {
                    return Err(DeucError::MissingLoopNext { offset: node.offset });
                }
                NodeKind::If(i) if i.open => {
                    return Err(DeucError::MissedJumpTarget { offset: i.at, target: i.target });
                }
                _ if node.is_function_marker() => {
                    return Err(DeucError::UnexpectedMarker { opcode: node.opcode(), offset: node.offset });
                }
                _ => {}
            }
        }
        func.body = Vec::from(body);

        if let Some(Node { kind: NodeKind::ProcExclude, offset }) = self.nodes.back() {
            func.procexclude_offset = Some(*offset);
            func.has_procexclude = true;
            self.nodes.pop_back();
        }

        let info = match self.nodes.pop_back() {
            Some(Node { kind: NodeKind::SetInfo(info), .. }) => info,
            Some(other) => {
                return Err(DeucError::MissingMarker { expected: "set info", opcode: other.opcode(), offset: other.offset });
            }
            None => return Err(DeucError::MissingMarker { expected: "set info", opcode: ret.opcode(), offset: ret.offset }),
        };
        func.process_type = match &info.process_type.kind {
            NodeKind::Push(DataType::Word(v)) => *v as u16,
            _ => return Err(DeucError::InvalidSetInfo { offset: info.at, reason: "process type is not a word push" }),
        };
        match &info.this_ptr.kind {
            NodeKind::PushIndirect { ptr, .. } if ptr.kind == NodeKind::Push(DataType::LocalDword(0x06)) => {
                func.this_confirmed = true;
            }
            _ => {
                return Err(DeucError::InvalidSetInfo { offset: info.at, reason: "this pointer is not an indirect push of [BP+06h]" });
            }
        }
        func.set_info = Some(info);

        match self.nodes.pop_back() {
            Some(Node { kind: NodeKind::Init { locals }, offset }) => {
                func.locals_size = locals;
                func.start_offset = offset;
            }
            Some(other) => {
                return Err(DeucError::MissingMarker { expected: "init", opcode: other.opcode(), offset: other.offset });
            }
            None => return Err(DeucError::MissingMarker { expected: "init", opcode: ret.opcode(), offset: ret.offset }),
        }

        func.is_startup = func.start_offset == 0;
        if func.is_startup && func.startup.is_none() {
            func.startup = Some(StartupNode { offset: func.start_offset });
        }
        func.class_name = self.class_name.clone();

        if self.collapse {
            func.body = collapse_switches(std::mem::take(&mut func.body));
        }

        if !self.nodes.is_empty() {
            return Err(DeucError::StackNotEmpty { offset: func.start_offset, remaining: self.nodes.len() });
        }

        debug!(
            start = func.start_offset,
            body = func.body.len(),
            process_type = func.process_type,
            "folded function"
        );
        Ok(func)
    }

    fn close_conditionals(&mut self, offset: u32) -> Result<(), DeucError> {
        while let Some(p) = self.nodes.iter().rposition(Node::is_open) {
            match &self.nodes[p].kind {
                NodeKind::If(i) if i.target == offset => self.close_conditional(p, offset),
                _ => break,
            }
        }
        for node in &self.nodes {
            if let NodeKind::If(i) = &node.kind {
                if i.open && i.target <= offset {
                    return Err(DeucError::MissedJumpTarget { offset: i.at, target: i.target });
                }
            }
        }
        Ok(())
    }

    fn close_conditional(&mut self, p: usize, offset: u32) {
        let mut body: Vec<Node> = self.nodes.drain(p + 1..).collect();
        let Some(Node { kind: NodeKind::If(cond), .. }) = self.nodes.get_mut(p) else {
            return;
        };

        // a forward jump ending an if body skips the else branch that follows
        let mut else_node = None;
        if cond.kind != IfKind::Else {
            if let Some(Node { kind: NodeKind::Jmp { target }, offset: jmp_at }) = body.last() {
                if *target > offset {
                    let node = IfNode {
                        kind: IfKind::Else,
                        at: *jmp_at,
                        target: *target,
                        cond: None,
                        body: Vec::new(),
                        open: true,
                    };
                    else_node = Some(Node::new(*jmp_at, NodeKind::If(node)));
                    body.pop();
                }
            }
        } else if is_else_if_body(&body) {
            if let NodeKind::If(inner) = &mut body[0].kind {
                inner.kind = IfKind::ElseIf;
            }
        }

        cond.body = body;
        cond.open = false;
        if let Some(node) = else_node {
            self.nodes.push_back(node);
        }
    }

    fn close_loop(&mut self, at: u32) -> Result<(), DeucError> {
        let Some(p) = self.nodes.iter().rposition(Node::is_open) else {
            return Err(DeucError::UnexpectedLoopNext { offset: at });
        };
        if !matches!(self.nodes[p].kind, NodeKind::Loop(_) | NodeKind::Foreach(_)) {
            return Err(DeucError::UnexpectedLoopNext { offset: at });
        }
        let body: Vec<Node> = self.nodes.drain(p + 1..).collect();
        match &mut self.nodes[p].kind {
            NodeKind::Loop(l) => {
                l.body = body;
                l.next_offset = Some(at);
            }
            NodeKind::Foreach(f) => {
                f.body = body;
                f.next_offset = Some(at);
            }
            _ => {}
        }
        Ok(())
    }
}

/// An else whose whole body is one plain if, optionally followed by that if's own else.
fn is_else_if_body(body: &[Node]) -> bool {
    let first_is_if = matches!(body.first(), Some(Node { kind: NodeKind::If(i), .. }) if i.kind == IfKind::If);
    let rest_is_else = match body.get(1..) {
        Some([]) => true,
        Some([Node { kind: NodeKind::If(i), .. }]) => i.kind == IfKind::Else,
        _ => false,
    };
    first_is_if && rest_is_else
}

/// Class name carried in a symbol info marker's NUL padded name field.
pub fn symbol_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub fn fold_function(instrs: impl IntoIterator<Item = Instr>, collapse_switches: bool) -> Result<FunctionNode, DeucError> {
    let mut stack = FoldStack::new(collapse_switches);
    for ins in instrs {
        stack.fold(ins)?;
    }
    stack.finish()
}
