//! Tests for challenge sessions: one load, many calls, shared globals.

use pretty_assertions::assert_eq;
use scriptbox::{ChallengeError, Engine, EngineConfig, HostValue};

fn engine() -> Engine {
    Engine::new(EngineConfig::default().fixed_seed(11)).unwrap()
}

#[test]
fn one_line_function_returns_first_character() {
    let mut challenge = engine().challenge();
    challenge.initialize("def move(s): return s[0]").unwrap();
    let value = challenge.invoke("move", &[HostValue::from(vec!["x", "y"])]).unwrap();
    assert_eq!(value, HostValue::from("x"));
    assert_eq!(challenge.invocations(), 1);
}

#[test]
fn global_state_persists_between_calls() {
    let source = "\
turns = 0

def play(board):
    global turns
    turns += 1
    return [turns, len(board)]
";
    let mut challenge = engine().challenge();
    challenge.initialize(source).unwrap();
    let first = challenge.invoke("play", &[HostValue::from("...")]).unwrap();
    let second = challenge.invoke("play", &[HostValue::from("....")]).unwrap();
    assert_eq!(first, HostValue::from(vec![1_i64, 3]));
    assert_eq!(second, HostValue::from(vec![2_i64, 4]));
    assert_eq!(challenge.invocations(), 2);
}

#[test]
fn undefined_and_non_callable_names_are_descriptive() {
    let mut challenge = engine().challenge();
    challenge.initialize("board = [1, 2]\n").unwrap();
    assert_eq!(
        challenge.invoke("move", &[]),
        Err(ChallengeError::UndefinedFunction("move".to_owned()))
    );
    let error = challenge.invoke("board", &[]).unwrap_err();
    assert!(matches!(error, ChallengeError::NotCallable { ref name, .. } if name == "board"));
    assert!(error.to_string().contains("board"));
}

#[test]
fn exceptions_in_a_call_keep_the_session_usable() {
    let source = "def pick(items, i):\n    return items[i]\n";
    let mut challenge = engine().challenge();
    challenge.initialize(source).unwrap();
    let args = [HostValue::from(vec![1_i64]), HostValue::Int(5)];
    let Err(ChallengeError::Raised(error)) = challenge.invoke("pick", &args) else {
        panic!("expected an IndexError");
    };
    assert_eq!(error.exc_type, "IndexError");
    assert_eq!(error.line, Some(2));

    let args = [HostValue::from(vec![1_i64]), HostValue::Int(0)];
    assert_eq!(challenge.invoke("pick", &args), Ok(HostValue::Int(1)));
}

#[test]
fn load_failure_is_reported_and_nothing_stays_loaded() {
    let mut challenge = engine().challenge();
    let error = challenge.initialize("def broken(:\n    pass\n").unwrap_err();
    let ChallengeError::Load(result) = error else {
        panic!("expected a load error, got {error:?}");
    };
    assert_eq!(result.error.map(|e| e.exc_type), Some("SyntaxError".to_owned()));
    assert!(!challenge.is_initialized());
}

#[test]
fn printed_output_is_collected() {
    let mut challenge = engine().challenge();
    challenge
        .initialize("print('ready')\ndef say(word):\n    print(word)\n    return None\n")
        .unwrap();
    challenge.invoke("say", &[HostValue::from("hello")]).unwrap();
    assert_eq!(challenge.take_output(), "ready\nhello\n");
    assert_eq!(challenge.take_output(), "");
}

#[test]
fn a_runaway_call_times_out() {
    let mut challenge = Engine::new(EngineConfig::default().timeout(std::time::Duration::from_millis(200)))
        .unwrap()
        .challenge();
    challenge.initialize("def spin():\n    while True:\n        pass\n").unwrap();
    assert_eq!(challenge.invoke("spin", &[]), Err(ChallengeError::Timeout));
}
