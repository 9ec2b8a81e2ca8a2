//! End-to-end tests of the lowering pass.
//!
//! Programs are built with the AST constructors (or read from JSON, the way
//! the driver receives them) and the emitted NASM text is checked for the
//! instruction sequences each construct must produce.

use kuc::ast::{BinaryOp, ElseBranch, Location, Node, Param, Program};
use kuc::core::SymbolKind;
use kuc::{compile_program, compile_with_options, CompileError, CompileOptions, ScalarType};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compile(body: Vec<Node>) -> Result<String, CompileError> {
    init();
    compile_program(&Program::new(body))
}

/// Helper to check if output contains expected patterns
fn check_output_contains(output: &str, patterns: &[&str]) {
    for pattern in patterns {
        assert!(
            output.contains(pattern),
            "Output missing expected pattern: '{pattern}'\nFull output:\n{output}"
        );
    }
}

/// Text of a user function, from its entry label to the end of its frame.
fn function_text<'a>(asm: &'a str, name: &str) -> &'a str {
    let start = asm
        .find(&format!("_{name}:\n"))
        .unwrap_or_else(|| panic!("no function {name}"));
    let end = start
        + asm[start..]
            .find(&format!("_skip_{name}:"))
            .unwrap_or_else(|| panic!("no end of {name}"));
    &asm[start..end]
}

fn program_text(asm: &str) -> &str {
    &asm[asm.find("_start:").expect("entry point")..]
}

/// Name of the label a line ending in `suffix:` defines.
fn label_ending(asm: &str, suffix: &str) -> String {
    asm.lines()
        .find(|line| line.ends_with(&format!("{suffix}:")) && line.starts_with('L'))
        .map(|line| line.trim_end_matches(':').to_string())
        .unwrap_or_else(|| panic!("no label ending in {suffix}"))
}

#[test]
fn test_layout_of_translation_unit() {
    let asm = compile(vec![Node::call("out", vec![Node::string("hi")])]).unwrap();
    let data = asm.find("section .data").unwrap();
    let text = asm.find("section .text").unwrap();
    let first_function = asm.find("_len:").unwrap();
    let entry = asm.find("_start:").unwrap();
    assert!(asm.starts_with("bits 32\n"));
    assert!(data < text && text < first_function && first_function < entry);
    check_output_contains(&asm, &["global _start", ": db 104, 105, 0"]);
}

#[test]
fn test_arithmetic_result_is_returned_through_the_result_slot() {
    let asm = compile(vec![Node::function(
        "five",
        vec![],
        ScalarType::Integer,
        vec![
            Node::declare(
                "x",
                ScalarType::Integer,
                Some(Node::binary(BinaryOp::Add, Node::num(2), Node::num(3))),
            ),
            Node::ret(Some(Node::var("x"))),
        ],
    )])
    .unwrap();
    let five = function_text(&asm, "five");
    let ret = label_ending(&asm, "_ret_five");
    check_output_contains(
        five,
        &[
            "    mov eax, 2\n    push eax\n    mov eax, 3\n    mov ecx, eax\n    pop eax\n    add eax, ecx\n",
            // x lives after the two result slots
            "    mov dword [ebp-12], eax\n",
            "    mov eax, dword [ebp-12]\n    mov dword [ebp-4], eax\n",
            &format!("    jmp {ret}\n"),
            &format!("{ret}:\n    mov eax, dword [ebp-4]\n    lea esp, [ebp+4]\n    pop ebp\n    ret\n"),
        ],
    );
}

#[test]
fn test_break_leaves_an_infinite_loop() {
    let asm = compile(vec![Node::while_loop(Node::boolean(true), vec![Node::brk()])]).unwrap();
    let exit = label_ending(&asm, "_while_exit");
    check_output_contains(&asm, &[&format!("    leave\n    jmp {exit}\n")]);
}

#[test]
fn test_arity_mismatch_aborts_with_location() {
    init();
    let program = Program::new(vec![
        Node::function(
            "pair",
            vec![
                Param::new("a", ScalarType::Integer),
                Param::new("b", ScalarType::Integer),
            ],
            ScalarType::Integer,
            vec![Node::ret(Some(Node::var("a")))],
        ),
        Node::call("pair", vec![Node::num(1)]).at(4, 2),
    ]);
    let err = compile_with_options(&program, CompileOptions::default()).unwrap_err();
    assert_eq!(
        err,
        CompileError::ArityMismatch {
            name: "pair".to_string(),
            expected: 2,
            found: 1,
            location: Location::new(4, 2),
        }
    );
    assert_eq!(err.to_string(), "4:2: function `pair` expects 2 argument(s), got 1");
}

#[test]
fn test_boolean_branches_share_the_return_label() {
    let asm = compile(vec![Node::function(
        "pick",
        vec![],
        ScalarType::Boolean,
        vec![
            Node::declare(
                "a",
                ScalarType::Boolean,
                Some(Node::binary(BinaryOp::Eq, Node::num(1), Node::num(2))),
            ),
            Node::if_else(
                Node::var("a"),
                vec![Node::ret(Some(Node::boolean(true)))],
                Some(ElseBranch::Block(vec![Node::ret(Some(Node::boolean(false)))])),
            ),
        ],
    )])
    .unwrap();
    let pick = function_text(&asm, "pick");
    let ret = label_ending(&asm, "_ret_pick");
    // both branches plus the implicit fall-through return
    assert_eq!(pick.matches(&format!("jmp {ret}\n")).count(), 3);
    check_output_contains(pick, &["    sete al\n", "    movzx eax, byte [ebp-9]\n"]);
}

#[test]
fn test_lookup_depth_becomes_frame_chase() {
    let asm = compile(vec![
        Node::declare("n", ScalarType::Integer, Some(Node::num(7))),
        Node::if_else(
            Node::boolean(true),
            vec![Node::if_else(
                Node::boolean(true),
                vec![Node::assign("n", Node::num(8))],
                None,
            )],
            None,
        ),
    ])
    .unwrap();
    check_output_contains(
        program_text(&asm),
        &["    mov eax, 8\n    mov esi, ebp\n    mov esi, dword [esi]\n    mov esi, dword [esi]\n    mov dword [esi-4], eax\n"],
    );
}

#[test]
fn test_unresolved_variable_is_located() {
    let err = compile(vec![Node::call("out", vec![Node::var("ghost").at(9, 5)])]).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedSymbol {
            kind: SymbolKind::Variable,
            name: "ghost".to_string(),
            location: Location::new(9, 5),
        }
    );
    assert_eq!(err.location(), Location::new(9, 5));
}

#[test]
fn test_variables_of_a_closed_scope_are_gone() {
    let err = compile(vec![
        Node::if_else(
            Node::boolean(true),
            vec![Node::declare("inner", ScalarType::Integer, None)],
            None,
        ),
        Node::assign("inner", Node::num(1)),
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnresolvedSymbol { kind: SymbolKind::Variable, .. }
    ));
}

#[test]
fn test_binary_type_rules() {
    let mismatch = compile(vec![Node::declare(
        "x",
        ScalarType::String,
        Some(Node::binary(BinaryOp::Add, Node::string("a"), Node::num(1))),
    )])
    .unwrap_err();
    assert!(matches!(
        mismatch,
        CompileError::BinaryTypeMismatch {
            op: BinaryOp::Add,
            left: ScalarType::String,
            right: ScalarType::Integer,
            ..
        }
    ));

    let unsupported = compile(vec![Node::declare(
        "x",
        ScalarType::Boolean,
        Some(Node::binary(BinaryOp::Lt, Node::boolean(true), Node::boolean(false))),
    )])
    .unwrap_err();
    assert!(matches!(
        unsupported,
        CompileError::UnsupportedOperation { op: "<", ty: ScalarType::Boolean, .. }
    ));

    let logical = compile(vec![Node::declare(
        "x",
        ScalarType::Boolean,
        Some(Node::binary(BinaryOp::And, Node::boolean(true), Node::boolean(false))),
    )]);
    assert!(logical.is_ok());

    let ordered_chars = compile(vec![Node::declare(
        "x",
        ScalarType::Boolean,
        Some(Node::binary(BinaryOp::Ge, Node::chr(b'b'), Node::chr(b'a'))),
    )]);
    assert!(ordered_chars.is_ok());
}

#[test]
fn test_identical_literals_share_one_symbol() {
    let asm = compile(vec![
        Node::call("out", vec![Node::string("same")]),
        Node::if_else(
            Node::boolean(true),
            vec![Node::call("out", vec![Node::string("same")])],
            None,
        ),
        Node::call("out", vec![Node::string("other")]),
    ])
    .unwrap();
    // "same" = 115, 97, 109, 101
    assert_eq!(asm.matches(": db 115, 97, 109, 101, 0").count(), 1);
    assert_eq!(asm.matches(": db 111, 116, 104, 101, 114, 0").count(), 1);

    let same = asm
        .lines()
        .find(|line| line.ends_with(": db 115, 97, 109, 101, 0"))
        .and_then(|line| line.split(':').next())
        .unwrap();
    assert_eq!(asm.matches(&format!("mov eax, {same}\n")).count(), 2);
}

#[test]
fn test_nested_loops_break_to_their_own_exit() {
    let asm = compile(vec![Node::while_loop(
        Node::boolean(true),
        vec![
            Node::while_loop(Node::boolean(true), vec![Node::brk()]),
            Node::brk(),
        ],
    )])
    .unwrap();
    let exits: Vec<String> = asm
        .lines()
        .filter(|line| line.ends_with("_while_exit:"))
        .map(|line| line.trim_end_matches(':').to_string())
        .collect();
    assert_eq!(exits.len(), 2);
    for exit in &exits {
        assert_eq!(asm.matches(&format!("jmp {exit}\n")).count(), 1);
    }
}

#[test]
fn test_for_loop_counts() {
    let asm = compile(vec![Node::for_loop(
        Node::declare("i", ScalarType::Integer, Some(Node::num(0))),
        Node::binary(BinaryOp::Lt, Node::var("i"), Node::num(3)),
        Node::assign("i", Node::binary(BinaryOp::Add, Node::var("i"), Node::num(1))),
        vec![],
    )])
    .unwrap();
    let top = label_ending(&asm, "_while_top");
    check_output_contains(&asm, &["    setl al\n", &format!("    jmp {top}\n")]);
}

#[test]
fn test_program_read_from_json() {
    init();
    let json = r#"{
        "body": [
            { "type": "declare", "name": "greeting", "ty": "str",
              "value": { "type": "str", "value": "hey" },
              "location": { "line": 1, "col": 1 } },
            { "type": "call", "name": "out",
              "args": [ { "type": "var", "name": "greeting" } ],
              "location": { "line": 2, "col": 1 } }
        ]
    }"#;
    let program: Program = serde_json::from_str(json).unwrap();
    let assembly = compile_with_options(&program, CompileOptions::default()).unwrap();
    check_output_contains(&assembly.text, &[": db 104, 101, 121, 0", "; :greeting/str"]);
    assert_eq!(assembly.stats.functions_compiled, kuc::builtins::BUILTINS.len());
    assert!(assembly.stats.calls_emitted >= 1);
    assert!(assembly.stats.to_string().contains("Call sites emitted:"));
}

#[test]
fn test_compilations_are_independent() {
    init();
    let program = Program::new(vec![Node::declare(
        "s",
        ScalarType::String,
        Some(Node::binary(BinaryOp::Add, Node::string("a"), Node::string("b"))),
    )]);
    let first = compile_program(&program).unwrap();
    let second = compile_program(&program).unwrap();
    assert_eq!(first, second);
}
