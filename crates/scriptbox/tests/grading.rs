//! Tests for batch grading: fixed stdin, per-case isolation, scaffold line mapping.

use pretty_assertions::assert_eq;
use scriptbox::{BatchOptions, BatchSummary, Engine, EngineConfig, ErrorInfo, ExecutionStatus, TestCase};

const SQUARES: &str = "n = int(input())\nif n == 3:\n    while True:\n        pass\nprint(n * n)\n";

fn engine() -> Engine {
    Engine::new(EngineConfig::default().fixed_seed(3)).unwrap()
}

#[test]
fn a_hanging_case_times_out_without_affecting_the_rest() {
    let mut engine = engine();
    let cases: Vec<TestCase> = (1..=5)
        .map(|n| TestCase::new(format!("{n}\n")).expect(format!("{}\n", n * n)))
        .collect();
    let options = BatchOptions {
        timeout_ms: Some(300),
        ..BatchOptions::default()
    };
    let results = engine.run_batch(SQUARES, &cases, &options).unwrap();

    let statuses: Vec<ExecutionStatus> = results.iter().map(|result| result.status).collect();
    assert_eq!(
        statuses,
        [
            ExecutionStatus::Success,
            ExecutionStatus::Success,
            ExecutionStatus::Timeout,
            ExecutionStatus::Success,
            ExecutionStatus::Success,
        ]
    );
    assert!(!results[2].passed);
    assert_eq!(results[3].actual_output, "16\n");
    assert_eq!(BatchSummary::of(&results), BatchSummary { passed: 4, total: 5 });
    assert!(engine.registry().is_empty());
}

#[test]
fn missing_input_in_batch_is_an_eof_error() {
    let mut engine = engine();
    let results = engine
        .run_batch("a = input('a: ')\nb = input('b: ')\nprint(a + b)\n", &[TestCase::new("only\n")], &BatchOptions::default())
        .unwrap();
    let result = &results[0];
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.actual_output, "a: b: ");
    assert_eq!(
        result.error,
        Some(ErrorInfo::new("EOFError", "EOF when reading a line", Some(2)))
    );
}

#[test]
fn error_lines_are_relative_to_the_student_code() {
    let mut engine = engine();
    let options = BatchOptions {
        prepend: "import math\nLIMIT = 10\ndef helper(v):\n    return v\n".to_owned(),
        postpend: "print('scaffold done')\n".to_owned(),
        ..BatchOptions::default()
    };
    let student = "x = int(input())\nprint(LIMIT // x)\n";
    let results = engine
        .run_batch(student, &[TestCase::new("5").expect("2\nscaffold done"), TestCase::new("0")], &options)
        .unwrap();
    assert!(results[0].passed, "{:?}", results[0]);
    let error = results[1].error.clone().unwrap();
    assert_eq!(error.exc_type, "ZeroDivisionError");
    assert_eq!(error.line, Some(2));
    assert!(results[1].stderr.contains("line 2"), "{}", results[1].stderr);
}

#[test]
fn echo_input_reproduces_the_interactive_transcript() {
    let mut engine = engine();
    let options = BatchOptions {
        echo_input: true,
        ..BatchOptions::default()
    };
    let results = engine
        .run_batch(
            "name = input('Name: ')\nprint('Hi ' + name)\n",
            &[TestCase::new("Ada\n").expect("Name: Ada\nHi Ada\n")],
            &options,
        )
        .unwrap();
    assert!(results[0].passed);
    assert_eq!(results[0].actual_output, "Name: Ada\nHi Ada\n");
}

#[test]
fn output_comparison_ignores_trailing_whitespace() {
    let mut engine = engine();
    let results = engine
        .run_batch(
            "print('a  ')\nprint('b')\nprint()\n",
            &[TestCase::new("").expect("a\r\nb"), TestCase::new("").expect("a\nc")],
            &BatchOptions::default(),
        )
        .unwrap();
    assert!(results[0].passed);
    assert!(!results[1].passed);
}

#[test]
fn run_once_reports_a_single_case() {
    let mut engine = engine();
    let result = engine
        .run_once("print(int(input()) + 1)\n", "41\n", Some("42"), &BatchOptions::default())
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.passed);
}

#[test]
fn run_once_honours_echo_and_time_limit() {
    let mut engine = engine();
    let echoed = BatchOptions {
        echo_input: true,
        ..BatchOptions::default()
    };
    let result = engine
        .run_once("name = input('Name: ')\nprint('Hi ' + name)\n", "Ada\n", None, &echoed)
        .unwrap();
    assert_eq!(result.actual_output, "Name: Ada\nHi Ada\n");

    let limited = BatchOptions {
        timeout_ms: Some(100),
        ..BatchOptions::default()
    };
    let result = engine.run_once("while True:\n    pass\n", "", None, &limited).unwrap();
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(!result.passed);
    assert!(engine.registry().is_empty());
}
