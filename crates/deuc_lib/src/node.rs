//! The folded syntax tree.
//!
//! Every instruction and every construct recovered during folding is one arm of
//! [`NodeKind`]. Composites own their children; the only retained "references"
//! are owned copies (a switch keeps the conditionals it replaced, a function keeps
//! its set-info operands and the offsets of the markers it absorbed).

use serde::{Deserialize, Serialize};

use crate::instr::*;
use crate::types::{DataType, PopTarget, Type};

pub const SYNTH_FUNCTION: u16 = 0xFFFF;
pub const SYNTH_SWITCH: u16 = 0xFFFE;
pub const SYNTH_CASE: u16 = 0xFFFD;
pub const SYNTH_STARTUP: u16 = 0xFFFC;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Offset of the first (lowest address) instruction contributing to this node.
    pub offset: u32,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    LineNumber { line: u16 },
    SymbolInfo { rel: u16, name: [u8; SYMBOL_NAME_LEN] },
    Suspend,
    Init { locals: u8 },
    Ret,
    ProcExclude,
    SetInfo(SetInfo),
    Push(DataType),
    Pop { at: u32, target: PopTarget, value: Box<Node> },
    BinOp { at: u32, op: BinOp, lhs: Box<Node>, rhs: Box<Node> },
    Not { at: u32, value: Box<Node> },
    PushIndirect { at: u32, size: u8, ptr: Box<Node> },
    Calli { at: u32, arg_bytes: u8, intrinsic: u16, args: Vec<Node> },
    RetVal { at: u32, dword: bool, call: Box<Node> },
    Jmp { target: u32 },
    If(IfNode),
    LoopScript { token: u8 },
    Loop(LoopNode),
    Foreach(ForeachNode),
    Switch(SwitchNode),
    Function(Box<FunctionNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Ne,
}

impl BinOp {
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Some(match opcode {
            OP_ADD => BinOp::Add,
            OP_SUB => BinOp::Sub,
            OP_MUL => BinOp::Mul,
            OP_DIV => BinOp::Div,
            OP_MOD => BinOp::Mod,
            OP_CMP => BinOp::Eq,
            OP_LT => BinOp::Lt,
            OP_LE => BinOp::Le,
            OP_GT => BinOp::Gt,
            OP_GE => BinOp::Ge,
            OP_AND => BinOp::And,
            OP_OR => BinOp::Or,
            OP_NE => BinOp::Ne,
            _ => return None,
        })
    }

    pub fn opcode(self) -> u8 {
        match self {
            BinOp::Add => OP_ADD,
            BinOp::Sub => OP_SUB,
            BinOp::Mul => OP_MUL,
            BinOp::Div => OP_DIV,
            BinOp::Mod => OP_MOD,
            BinOp::Eq => OP_CMP,
            BinOp::Lt => OP_LT,
            BinOp::Le => OP_LE,
            BinOp::Gt => OP_GT,
            BinOp::Ge => OP_GE,
            BinOp::And => OP_AND,
            BinOp::Or => OP_OR,
            BinOp::Ne => OP_NE,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetInfo {
    pub at: u32,
    pub process_type: Box<Node>,
    pub this_ptr: Box<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IfKind {
    If,
    ElseIf,
    Else,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfNode {
    pub kind: IfKind,
    pub at: u32,
    pub target: u32,
    /// Always `None` for [`IfKind::Else`].
    pub cond: Option<Box<Node>>,
    pub body: Vec<Node>,
    pub open: bool,
}

impl IfNode {
    pub fn opcode(&self) -> u8 {
        match self.kind {
            IfKind::If | IfKind::ElseIf => OP_JNE,
            IfKind::Else => OP_JMP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptToken {
    pub offset: u32,
    pub token: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopNode {
    pub at: u32,
    pub slot: i8,
    pub str_size: u8,
    pub search_type: u8,
    pub script: Vec<ScriptToken>,
    pub body: Vec<Node>,
    /// Offset of the loopnext that closed this loop; `None` while open.
    pub next_offset: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeachKind {
    List,
    SList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeachNode {
    pub at: u32,
    pub kind: ForeachKind,
    pub slot: i8,
    pub elem_size: u8,
    pub target: u32,
    pub list: Box<Node>,
    pub body: Vec<Node>,
    pub next_offset: Option<u32>,
}

impl ForeachNode {
    pub fn opcode(&self) -> u8 {
        match self.kind {
            ForeachKind::List => OP_FOREACH_LIST,
            ForeachKind::SList => OP_FOREACH_SLIST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchNode {
    pub discriminant: Box<Node>,
    pub cases: Vec<Case>,
    /// The conditionals this switch replaced, in stream order. The binary format
    /// has no switch instruction, so emission walks these instead of `cases`.
    pub originals: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub offset: u32,
    /// `None` is the default case.
    pub value: Option<Box<Node>>,
    pub body: Vec<Node>,
}

impl Case {
    pub fn opcode(&self) -> u16 {
        SYNTH_CASE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupNode {
    pub offset: u32,
}

impl StartupNode {
    pub fn opcode(&self) -> u16 {
        SYNTH_STARTUP
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    pub start_offset: u32,
    pub locals_size: u8,
    pub process_type: u16,
    pub is_startup: bool,
    pub has_procexclude: bool,
    pub this_confirmed: bool,
    pub class_name: Option<String>,
    pub class_id: u32,
    pub event: Option<u32>,
    pub startup: Option<StartupNode>,
    pub set_info: Option<SetInfo>,
    pub body: Vec<Node>,
    pub procexclude_offset: Option<u32>,
    pub ret_offset: Option<u32>,
    pub end_offset: Option<u32>,
}

impl FunctionNode {
    pub fn new(ret_offset: u32) -> Self {
        Self {
            start_offset: 0,
            locals_size: 0,
            process_type: 0,
            is_startup: false,
            has_procexclude: false,
            this_confirmed: false,
            class_name: None,
            class_id: 0,
            event: None,
            startup: None,
            set_info: None,
            body: Vec::new(),
            procexclude_offset: None,
            ret_offset: Some(ret_offset),
            end_offset: None,
        }
    }

    pub fn missing_marker(&self) -> Option<&'static str> {
        if self.set_info.is_none() {
            Some("set info")
        } else if self.ret_offset.is_none() {
            Some("ret")
        } else if self.end_offset.is_none() {
            Some("end")
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_marker().is_none()
    }

    pub fn contains_switch(&self) -> bool {
        fn any_switch(nodes: &[Node]) -> bool {
            nodes.iter().any(|n| match &n.kind {
                NodeKind::Switch(_) => true,
                NodeKind::If(i) => any_switch(&i.body),
                NodeKind::Loop(l) => any_switch(&l.body),
                NodeKind::Foreach(f) => any_switch(&f.body),
                _ => false,
            })
        }
        any_switch(&self.body)
    }
}

impl Node {
    pub fn new(offset: u32, kind: NodeKind) -> Self {
        Self { offset, kind }
    }

    /// The original instruction byte, or a synthetic value for folded constructs.
    pub fn opcode(&self) -> u16 {
        let op = match &self.kind {
            NodeKind::LineNumber { .. } => OP_LINE_NUMBER,
            NodeKind::SymbolInfo { .. } => OP_SYMBOL_INFO,
            NodeKind::Suspend => OP_SUSPEND,
            NodeKind::Init { .. } => OP_INIT,
            NodeKind::Ret => OP_RET,
            NodeKind::ProcExclude => OP_PROC_EXCLUDE,
            NodeKind::SetInfo(_) => OP_SET_INFO,
            NodeKind::Push(d) => push_opcode(d),
            NodeKind::Pop { target, .. } => pop_opcode(*target),
            NodeKind::BinOp { op, .. } => op.opcode(),
            NodeKind::Not { .. } => OP_NOT,
            NodeKind::PushIndirect { .. } => OP_PUSH_INDIRECT,
            NodeKind::Calli { .. } => OP_CALLI,
            NodeKind::RetVal { dword: false, .. } => OP_RETVAL_WORD,
            NodeKind::RetVal { dword: true, .. } => OP_RETVAL_DWORD,
            NodeKind::Jmp { .. } => OP_JMP,
            NodeKind::If(i) => i.opcode(),
            NodeKind::LoopScript { .. } => OP_LOOPSCR,
            NodeKind::Loop(_) => OP_LOOP,
            NodeKind::Foreach(f) => f.opcode(),
            NodeKind::Switch(_) => return SYNTH_SWITCH,
            NodeKind::Function(_) => return SYNTH_FUNCTION,
        };
        op as u16
    }

    pub fn rtype(&self) -> Type {
        match &self.kind {
            NodeKind::Push(d) => d.rtype(),
            NodeKind::BinOp { .. } | NodeKind::Not { .. } => Type::Word,
            NodeKind::PushIndirect { size, .. } => {
                if *size == 4 {
                    Type::Dword
                } else {
                    Type::Word
                }
            }
            NodeKind::RetVal { dword, .. } => {
                if *dword {
                    Type::Dword
                } else {
                    Type::Word
                }
            }
            NodeKind::LineNumber { .. }
            | NodeKind::SymbolInfo { .. }
            | NodeKind::Suspend
            | NodeKind::Init { .. }
            | NodeKind::Ret
            | NodeKind::ProcExclude
            | NodeKind::SetInfo(_)
            | NodeKind::LoopScript { .. } => Type::Invalid,
            NodeKind::Pop { .. }
            | NodeKind::Calli { .. }
            | NodeKind::Jmp { .. }
            | NodeKind::If(_)
            | NodeKind::Loop(_)
            | NodeKind::Foreach(_)
            | NodeKind::Switch(_)
            | NodeKind::Function(_) => Type::Void,
        }
    }

    pub fn is_open(&self) -> bool {
        match &self.kind {
            NodeKind::If(i) => i.open,
            NodeKind::Loop(l) => l.next_offset.is_none(),
            NodeKind::Foreach(f) => f.next_offset.is_none(),
            _ => false,
        }
    }

    /// Markers that a function fold must absorb and that may never sit in a body.
    pub fn is_function_marker(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Init { .. }
                | NodeKind::Ret
                | NodeKind::ProcExclude
                | NodeKind::SetInfo(_)
                | NodeKind::Function(_)
        )
    }
}

pub fn push_opcode(d: &DataType) -> u8 {
    match d {
        DataType::Byte(_) => OP_PUSH_BYTE,
        DataType::Word(_) => OP_PUSH_WORD,
        DataType::Dword(_) => OP_PUSH_DWORD,
        DataType::Str(_) => OP_PUSH_STRING,
        DataType::LocalByte(_) => OP_PUSH_LOCAL_BYTE,
        DataType::LocalWord(_) => OP_PUSH_LOCAL_WORD,
        DataType::LocalDword(_) => OP_PUSH_LOCAL_DWORD,
        DataType::Global { .. } => OP_PUSH_GLOBAL,
    }
}

pub fn pop_opcode(t: PopTarget) -> u8 {
    match t {
        PopTarget::LocalByte(_) => OP_POP_BYTE,
        PopTarget::LocalWord(_) => OP_POP_WORD,
        PopTarget::LocalDword(_) => OP_POP_DWORD,
        PopTarget::Global { .. } => OP_POP_GLOBAL,
        PopTarget::Temp => OP_POP_TEMP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binop_opcodes_round_trip() {
        for op in [OP_ADD, OP_SUB, OP_MUL, OP_DIV, OP_MOD, OP_CMP, OP_LT, OP_LE, OP_GT, OP_GE, OP_AND, OP_OR, OP_NE] {
            assert_eq!(BinOp::from_opcode(op).map(BinOp::opcode), Some(op));
        }
        assert_eq!(BinOp::from_opcode(OP_NOT), None);
    }

    #[test]
    fn else_uses_the_jmp_opcode() {
        let node = Node::new(
            4,
            NodeKind::If(IfNode { kind: IfKind::Else, at: 4, target: 9, cond: None, body: vec![], open: false }),
        );
        assert_eq!(node.opcode(), OP_JMP as u16);
        assert_eq!(node.rtype(), Type::Void);
        assert!(!node.is_open());
    }

    #[test]
    fn synthesized_constructs_use_reserved_opcodes() {
        let case = Case { offset: 0, value: None, body: vec![] };
        assert_eq!(case.opcode(), SYNTH_CASE);
        assert_eq!(StartupNode { offset: 0 }.opcode(), SYNTH_STARTUP);
        let switch = Node::new(
            0,
            NodeKind::Switch(SwitchNode {
                discriminant: Box::new(Node::new(0, NodeKind::Push(DataType::LocalWord(-2)))),
                cases: vec![case],
                originals: vec![],
            }),
        );
        assert_eq!(switch.opcode(), SYNTH_SWITCH);
        assert_eq!(switch.rtype(), Type::Void);
    }

    #[test]
    fn fresh_function_is_incomplete() {
        let f = FunctionNode::new(0x20);
        assert_eq!(f.missing_marker(), Some("set info"));
        assert!(!f.is_complete());
    }
}
