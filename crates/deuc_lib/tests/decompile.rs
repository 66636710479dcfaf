mod common;

use common::{Code, class_record};
use deuc_lib::instr::*;
use deuc_lib::node::{FunctionNode, Node, NodeKind};
use deuc_lib::types::DataType;
use deuc_lib::{
    DecompileMode, DecompileOptions, DeucError, decode_functions, decode_instructions, fold_function, render_binary,
};

fn fold(code: &Code, collapse: bool) -> FunctionNode {
    fold_function(decode_instructions(&code.bytes).unwrap(), collapse).unwrap()
}

/// Three equality tests on var_02 and an else, all in one function.
fn three_case_switch() -> Code {
    let mut c = Code::new();
    c.prologue(2, 0x0000, true);
    c.eq_if(-2, 1, false, |c| {
        c.suspend();
    });
    c.eq_if(-2, 2, false, |c| {
        c.suspend();
    });
    let out = c.eq_if(-2, 3, true, |c| {
        c.suspend();
    });
    c.suspend().suspend();
    if let Some(jmp) = out {
        c.land(jmp);
    }
    c.epilogue();
    c
}

fn has_marker(nodes: &[Node]) -> bool {
    nodes.iter().any(|n| {
        n.is_function_marker()
            || match &n.kind {
                NodeKind::If(i) => has_marker(&i.body),
                NodeKind::Loop(l) => has_marker(&l.body),
                NodeKind::Foreach(f) => has_marker(&f.body),
                NodeKind::Switch(s) => s.cases.iter().any(|c| has_marker(&c.body)),
                _ => false,
            }
    })
}

#[test]
fn three_tests_and_else_collapse_into_one_switch() {
    let code = three_case_switch();
    let func = fold(&code, true);
    assert_eq!(func.body.len(), 1);
    let NodeKind::Switch(s) = &func.body[0].kind else {
        panic!("expected a switch, got {:?}", func.body[0]);
    };
    assert_eq!(s.discriminant.kind, NodeKind::Push(DataType::LocalWord(-2)));
    assert_eq!(s.cases.len(), 4);
    let values: Vec<_> = s.cases.iter().map(|c| c.value.as_ref().map(|v| v.kind.clone())).collect();
    assert_eq!(
        values,
        vec![
            Some(NodeKind::Push(DataType::Byte(1))),
            Some(NodeKind::Push(DataType::Byte(2))),
            Some(NodeKind::Push(DataType::Byte(3))),
            None,
        ]
    );
    assert_eq!(s.originals.len(), 4);
    for (case, original) in s.cases.iter().zip(&s.originals) {
        let NodeKind::If(i) = &original.kind else { panic!("expected a conditional, got {original:?}") };
        assert_eq!(case.body, i.body);
    }
    assert_eq!(s.cases[2].body.len(), 1);
    assert_eq!(s.cases[3].body.len(), 2);

    assert_eq!(render_binary(&func).unwrap(), code.bytes);
}

#[test]
fn collapse_can_be_switched_off() {
    let code = three_case_switch();
    let func = fold(&code, false);
    assert_eq!(func.body.len(), 4);
    assert!(!func.contains_switch());
    assert_eq!(render_binary(&func).unwrap(), code.bytes);
}

#[test]
fn single_equality_test_is_not_a_switch() {
    let mut c = Code::new();
    c.prologue(2, 0, true);
    c.eq_if(-2, 1, false, |c| {
        c.suspend();
    });
    c.epilogue();
    let func = fold(&c, true);
    assert_eq!(func.body.len(), 1);
    assert!(matches!(func.body[0].kind, NodeKind::If(_)));
}

#[test]
fn different_slot_stops_the_chain() {
    let mut c = Code::new();
    c.prologue(4, 0, true);
    c.eq_if(-2, 1, false, |c| {
        c.suspend();
    });
    c.eq_if(-2, 2, false, |c| {
        c.suspend();
    });
    c.eq_if(-4, 3, false, |c| {
        c.suspend();
    });
    c.epilogue();
    let func = fold(&c, true);
    assert_eq!(func.body.len(), 2);
    let NodeKind::Switch(s) = &func.body[0].kind else { panic!("expected a switch") };
    assert_eq!(s.cases.len(), 2);
    assert!(matches!(func.body[1].kind, NodeKind::If(_)));
}

#[test]
fn two_entry_chain_has_no_default() {
    let mut c = Code::new();
    c.prologue(2, 0, true);
    c.eq_if(-2, 1, false, |c| {
        c.suspend();
    });
    c.eq_if(-2, 2, false, |c| {
        c.suspend();
    });
    c.epilogue();
    let func = fold(&c, true);
    let NodeKind::Switch(s) = &func.body[0].kind else { panic!("expected a switch") };
    assert_eq!(s.cases.len(), 2);
    assert!(s.cases.iter().all(|c| c.value.is_some()));
}

/// startup, a scan loop plus foreach process, and a plain function with if/else.
fn three_function_class() -> (Code, u32, u32) {
    let mut c = Code::new();
    c.prologue(0, 0, true);
    c.raw(&[OP_LINE_NUMBER, 0x01, 0x00]);
    c.raw(&[OP_SYMBOL_INFO, 0x40, 0x00, b'M', b'O', b'N', b'S', b'T', b'E', b'R', 0, 0]);
    c.suspend();
    c.epilogue();

    let process = c.here();
    c.prologue(6, 0x00F0, true);
    c.raw(&[OP_LOOPSCR, b'$', OP_LOOP, 0xFE, 0x02, 0x00]);
    c.raw(&[OP_PUSH_STRING, 0x02, 0x00, b'h', b'i', OP_POP_TEMP]);
    c.raw(&[OP_LOOPNEXT]);
    c.push_local(-4);
    let each = c.foreach(OP_FOREACH_SLIST, -6, 2);
    c.raw(&[OP_PUSH_GLOBAL, 0x10, 0x00, 0x02, OP_PUSH_LOCAL_WORD, 0xFA, OP_ADD, OP_POP_GLOBAL, 0x10, 0x00, 0x02]);
    c.raw(&[OP_LOOPNEXT]);
    c.land_foreach(each);
    c.raw(&[OP_PUSH_LOCAL_DWORD, 0x06, OP_PUSH_INDIRECT, 0x04, OP_CALLI, 0x04, 0x01, 0x00, OP_RETVAL_WORD, OP_POP_WORD, 0xFE]);
    c.epilogue();

    let plain = c.here();
    c.prologue(2, 0x0001, false);
    c.push_local(0x08).raw(&[OP_NOT]);
    let jne = c.jump(OP_JNE);
    c.suspend();
    let jmp = c.jump(OP_JMP);
    c.land(jne);
    c.push_byte(-1).raw(&[OP_POP_WORD, 0xFE]);
    c.land(jmp);
    c.epilogue();
    (c, process, plain)
}

#[test]
fn every_function_of_a_class_round_trips() {
    let (code, _, _) = three_function_class();
    let report = deuc_lib::verify_roundtrip(&class_record(&code.bytes, &[])).unwrap();
    assert_eq!(report.checked, 3);
    assert!(report.is_exact(), "{report:?}");
}

#[test]
fn structural_markers_never_reach_a_body() {
    let (code, process, plain) = three_function_class();
    let runs = decode_functions(&code.bytes, &[]);
    assert_eq!(runs.len(), 3);
    assert_eq!(runs[1].start, process);
    assert_eq!(runs[2].start, plain);
    for run in runs {
        let func = fold_function(run.instrs.unwrap(), true).unwrap();
        assert!(func.is_complete());
        assert!(!has_marker(&func.body));
    }
}

#[test]
fn pseudocode_for_a_whole_class() {
    let (code, process, _) = three_function_class();
    let options = DecompileOptions { debug_comments: false, class_id: 0x2A, ..DecompileOptions::default() };
    let out = deuc_lib::decompile_with_options(&class_record(&code.bytes, &[(1, process)]), &options).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("startup\n{\n  suspend;\n}\n"), "{text}");
    assert!(text.contains("// event 01: use()\nprocess [[PT_ANIM, referent]] MONSTER::"), "{text}");
    assert!(text.contains("  for (var_02 in search(0x00, 2, { 0x24 })) {\n    \"hi\";\n  }\n"), "{text}");
    assert!(text.contains("  foreach slist (var_06 in var_04) {\n    global_0010 = global_0010 + var_06;\n  }\n"), "{text}");
    assert!(text.contains("  var_02 = Item::getX(*arg_06);\n"), "{text}");
    assert!(text.contains("  if (!arg_08) {\n    suspend;\n  }\n  else {\n    var_02 = -1;\n  }\n"), "{text}");
}

#[test]
fn class_name_option_overrides_symbol_info() {
    let (code, _, plain) = three_function_class();
    let options = DecompileOptions { class_name: Some("GUARD".to_string()), ..DecompileOptions::default() };
    let text = deuc_lib::decompile_with_options(&class_record(&code.bytes, &[]), &options).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains(&format!("\nGUARD::{:04X}()\n", plain)), "{text}");
}

#[test]
fn disassembly_lists_the_conditionals_behind_a_switch() {
    let code = three_case_switch();
    let options = DecompileOptions { mode: DecompileMode::Disasm, ..DecompileOptions::default() };
    let text = deuc_lib::decompile_with_options(&class_record(&code.bytes, &[]), &options).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert_eq!(text.lines().filter(|l| l.contains("  jne ")).count(), 3);
    assert_eq!(text.lines().filter(|l| l.contains("  jmp ")).count(), 1);
    assert!(text.lines().any(|l| l.starts_with("0000: 5A  init")));
}

#[test]
fn binary_mode_reproduces_the_code_section() {
    let (code, _, _) = three_function_class();
    let options = DecompileOptions { mode: DecompileMode::Binary, ..DecompileOptions::default() };
    let out = deuc_lib::decompile_with_options(&class_record(&code.bytes, &[]), &options).unwrap();
    assert_eq!(out, code.bytes);
}

/// A function whose set info pushes a byte instead of a word process type.
fn broken_class() -> Vec<u8> {
    let mut c = Code::new();
    c.prologue(0, 0, true).suspend().epilogue();
    c.raw(&[OP_INIT, 0x00, OP_PUSH_BYTE, 0x01, OP_PUSH_LOCAL_DWORD, 0x06, OP_PUSH_INDIRECT, 0x04, OP_SET_INFO]);
    c.raw(&[OP_PROC_EXCLUDE, OP_RET, OP_END]);
    c.prologue(0, 0, false).suspend().epilogue();
    class_record(&c.bytes, &[])
}

#[test]
fn failed_functions_are_isolated_in_text_output() {
    let text = deuc_lib::decompile(&broken_class()).unwrap();
    assert_eq!(text.matches("// decompilation error: function at 0x000E").count(), 1, "{text}");
    assert!(text.contains("set info"), "{text}");
    assert_eq!(text.matches("suspend;").count(), 2, "{text}");
}

#[test]
fn failed_functions_fail_binary_output_and_verification() {
    let options = DecompileOptions { mode: DecompileMode::Binary, ..DecompileOptions::default() };
    let err = deuc_lib::decompile_with_options(&broken_class(), &options).unwrap_err();
    let DeucError::InFunction { start, source } = err else { panic!("expected a function error") };
    assert_eq!(start, 0x0E);
    assert!(matches!(*source, DeucError::InvalidSetInfo { .. }));

    let report = deuc_lib::verify_roundtrip(&broken_class()).unwrap();
    assert_eq!(report.checked, 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 0x0E);
    assert!(report.mismatches.is_empty());
}

#[test]
fn leftover_values_fail_the_function_fold() {
    let mut c = Code::new();
    c.push_byte(7).prologue(0, 0, true).epilogue();
    let err = fold_function(decode_instructions(&c.bytes).unwrap(), true).unwrap_err();
    assert!(matches!(err, DeucError::StackNotEmpty { remaining: 1, .. }));
}

/// Three functions; the middle one uses an opcode the decoder does not know.
fn class_with_unknown_opcode() -> (Code, u32) {
    let mut c = Code::new();
    c.prologue(0, 0, true).suspend().epilogue();
    c.prologue(0, 0x00F0, true).raw(&[0x65, 0x02]).epilogue();
    let last = c.here();
    c.prologue(0, 0, false).suspend().epilogue();
    (c, last)
}

#[test]
fn undecodable_function_does_not_stop_the_class() {
    let (code, last) = class_with_unknown_opcode();
    assert_eq!(last, 0x1D);
    let text = deuc_lib::decompile(&class_record(&code.bytes, &[])).unwrap();
    assert!(
        text.contains("// decompilation error: function at 0x000E: invalid opcode 0x65 at 0x0019\n"),
        "{text}"
    );
    assert_eq!(text.matches("suspend;").count(), 2, "{text}");
    assert!(text.contains("\nclass_0000_function_001D()\n"), "{text}");

    let report = deuc_lib::verify_roundtrip(&class_record(&code.bytes, &[])).unwrap();
    assert_eq!(report.checked, 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 0x0E);
    assert!(report.mismatches.is_empty());
}

#[test]
fn event_entries_mark_where_decoding_resumes() {
    let (code, last) = class_with_unknown_opcode();
    let options = DecompileOptions { debug_comments: false, ..DecompileOptions::default() };
    let out = deuc_lib::decompile_with_options(&class_record(&code.bytes, &[(2, last)]), &options).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("// event 02: "), "{text}");
    assert!(text.ends_with("class_0000_function_001D()\n{\n  suspend;\n}\n"), "{text}");
}
