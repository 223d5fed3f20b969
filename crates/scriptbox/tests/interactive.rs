//! Tests for replay-based interactive runs through `Engine::submit_run` and the
//! typed `start`/`resume` handle.

use pretty_assertions::assert_eq;
use scriptbox::{BatchOptions, Engine, EngineConfig, EngineError, ExecutionStatus, SourceUnit, TestCase};

fn engine() -> Engine {
    Engine::new(EngineConfig::default().fixed_seed(1234)).unwrap()
}

fn inputs(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

#[test]
fn greeting_waits_for_name_then_finishes() {
    let mut engine = engine();
    let source = "name = input(\"Name: \")\nprint(\"Hi \" + name)";

    let waiting = engine.submit_run(source, &[], None).unwrap();
    assert_eq!(waiting.status, ExecutionStatus::AwaitingInput);
    assert_eq!(waiting.pending_prompt.as_deref(), Some("Name: "));
    assert_eq!(waiting.stdout, "");

    let done = engine.submit_run(source, &[], Some("Ada")).unwrap();
    assert_eq!(done.status, ExecutionStatus::Success);
    assert!(done.stdout.contains("Hi Ada"), "stdout was {:?}", done.stdout);
    assert_eq!(done.pending_prompt, None);
    assert_eq!(done.echo.as_deref(), Some("Ada"));
}

#[test]
fn output_before_the_first_input_is_replayed_every_attempt() {
    let mut engine = engine();
    let source = "print('welcome')\na = input('a? ')\nprint('got', a)\nb = input('b? ')\nprint(a, b)\n";

    let first = engine.submit_run(source, &[], None).unwrap();
    assert_eq!(first.stdout, "welcome\n");

    let second = engine.submit_run(source, &[], Some("1")).unwrap();
    assert_eq!(second.status, ExecutionStatus::AwaitingInput);
    assert_eq!(second.stdout, "welcome\na? got 1\n");
    assert_eq!(second.pending_prompt.as_deref(), Some("b? "));

    let third = engine.submit_run(source, &inputs(&["1"]), Some("2")).unwrap();
    assert_eq!(third.status, ExecutionStatus::Success);
    assert_eq!(third.stdout, "welcome\na? got 1\nb? 1 2\n");
    assert_eq!(third.inputs_consumed, 2);
}

#[test]
fn random_values_are_identical_across_replays() {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let source = "import random\nsecret = random.randint(1, 1000000)\nprint(secret)\nguess = input('guess: ')\nprint(secret)\n";

    let first = engine.submit_run(source, &[], None).unwrap();
    let drawn = first.stdout.clone();
    let second = engine.submit_run(source, &[], Some("5")).unwrap();
    assert_eq!(second.status, ExecutionStatus::Success);
    let lines: Vec<&str> = second.stdout.lines().collect();
    assert_eq!(lines[0], drawn.trim_end());
    assert_eq!(lines[1], format!("guess: {}", drawn.trim_end()));
}

#[test]
fn except_clauses_cannot_swallow_a_pending_input() {
    let mut engine = engine();
    let source = "try:\n    n = int(input('n: '))\nexcept Exception:\n    n = -1\nexcept:\n    n = -2\nprint(n * 2)\n";

    let waiting = engine.submit_run(source, &[], None).unwrap();
    assert_eq!(waiting.status, ExecutionStatus::AwaitingInput);
    assert_eq!(waiting.stdout, "");

    let done = engine.submit_run(source, &[], Some("21")).unwrap();
    assert_eq!(done.stdout, "n: 42\n");

    let bad = engine.submit_run(source, &[], Some("x")).unwrap();
    assert_eq!(bad.status, ExecutionStatus::Success);
    assert_eq!(bad.stdout, "n: -2\n");
}

#[test]
fn final_replay_matches_a_batch_run_with_the_same_inputs() {
    let source = "import random\nrandom.seed(7)\nx = input('x: ')\ny = input('y: ')\nprint(x * 2, y, random.randint(1, 6))\n";
    let mut engine = engine();
    engine.submit_run(source, &[], None).unwrap();
    engine.submit_run(source, &[], Some("ab")).unwrap();
    let interactive = engine.submit_run(source, &inputs(&["ab"]), Some("cd")).unwrap();

    let options = BatchOptions::default();
    let batch = engine
        .run_batch(source, &[TestCase::new("ab\ncd\n")], &options)
        .unwrap();
    assert_eq!(interactive.status, ExecutionStatus::Success);
    assert_eq!(batch[0].actual_output, interactive.stdout);
}

#[test]
fn runtime_errors_report_student_lines() {
    let mut engine = engine();
    let source = "a = input('a? ')\nprint(10 / int(a))\n";
    engine.submit_run(source, &[], None).unwrap();
    let result = engine.submit_run(source, &[], Some("0")).unwrap();
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    let error = result.error.unwrap();
    assert_eq!(error.exc_type, "ZeroDivisionError");
    assert_eq!(error.line, Some(2));
    assert!(result.stderr.starts_with("Traceback (most recent call last):\n"));
    assert!(result.stderr.contains("line 2"));
}

#[test]
fn changed_source_starts_a_new_run() {
    let mut engine = engine();
    let old = "x = input('old: ')\nprint(x)\n";
    let new = "x = input('new: ')\nprint(x + '!')\n";
    engine.submit_run(old, &[], None).unwrap();
    let result = engine.submit_run(new, &[], Some("v")).unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "new: v!\n");
    assert_eq!(engine.registry().len(), 1);
}

#[test]
fn typed_handle_resumes_until_completion() {
    let mut engine = engine();
    let mut run = engine
        .start(SourceUnit::new("total = 0\nfor i in range(3):\n    total += int(input(f'#{i}: '))\nprint(total)\n"))
        .unwrap();
    assert!(run.is_awaiting_input());
    for value in ["1", "2"] {
        let result = engine.resume(&mut run, value).unwrap();
        assert_eq!(result.status, ExecutionStatus::AwaitingInput);
    }
    let done = engine.resume(&mut run, "3").unwrap();
    assert_eq!(done.stdout, "#0: #1: #2: 6\n");
    assert_eq!(run.attempts(), 4);
    assert_eq!(run.inputs().as_slice(), ["1", "2", "3"]);
    assert_eq!(engine.resume(&mut run, "4"), Err(EngineError::NotAwaitingInput));
    engine.finish(run);
    assert!(engine.registry().is_empty());
}

#[test]
fn echo_writes_inputs_into_the_transcript() {
    let mut engine = Engine::new(EngineConfig::default().echo_inputs(true)).unwrap();
    let source = "name = input('Name: ')\nprint('Hi', name)\n";
    engine.submit_run(source, &[], None).unwrap();
    let result = engine.submit_run(source, &[], Some("Ada")).unwrap();
    assert_eq!(result.stdout, "Name: Ada\nHi Ada\n");
}
