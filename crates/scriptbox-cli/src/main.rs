//! Command-line front end for the scriptbox engine.

use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::{ArgAction, Parser, Subcommand};
use scriptbox::{BatchOptions, BatchSummary, CaseResult, Engine, EngineConfig, ExecutionStatus, HostValue, TestCase};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "scriptbox", version, about = "Run, grade and call student Python scripts")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-attempt time limit, overriding the configuration
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Fixed random seed, overriding the configuration
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script interactively on this terminal
    Run { file: PathBuf },
    /// Grade a script against JSON test cases and print a JSON report
    Grade { file: PathBuf, cases: PathBuf },
    /// Load a script and call one of its functions with JSON arguments
    Call {
        file: PathBuf,
        function: String,
        /// Arguments as JSON values; anything that is not valid JSON is passed as a string
        args: Vec<String>,
    },
}

/// A cases file: either a bare list of cases or cases plus batch options.
#[derive(Deserialize)]
#[serde(untagged)]
enum CasesFile {
    List(Vec<TestCase>),
    WithOptions {
        #[serde(default)]
        options: BatchOptions,
        cases: Vec<TestCase>,
    },
}

#[derive(Serialize)]
struct GradeReport<'a> {
    summary: BatchSummary,
    results: &'a [CaseResult],
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let result = match &cli.command {
        Command::Run { file } => run(&mut engine, file),
        Command::Grade { file, cases } => grade(&mut engine, file, cases),
        Command::Call { file, function, args } => call(&engine, file, function, args),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig, String> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).map_err(|err| err.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config = config.timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(seed) = cli.seed {
        config = config.fixed_seed(seed);
    }
    Ok(config)
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))
}

/// How much of a replayed transcript the terminal already shows.
///
/// Every attempt returns the whole transcript again, including the prompts written
/// while waiting and, when echo is on, the lines the user typed.
struct Transcript {
    shown: usize,
    echo_inputs: bool,
}

impl Transcript {
    fn new(echo_inputs: bool) -> Self {
        Self { shown: 0, echo_inputs }
    }

    fn unseen<'a>(&mut self, stdout: &'a str) -> &'a str {
        let fresh = stdout.get(self.shown..).unwrap_or_default();
        self.shown = self.shown.max(stdout.len());
        fresh
    }

    fn prompted(&mut self, prompt: &str) {
        self.shown += prompt.len();
    }

    /// The typed line and its newline are already on the terminal.
    fn answered(&mut self, value: &str) {
        if self.echo_inputs {
            self.shown += value.len() + 1;
        }
    }
}

/// Drives the replay loop against the terminal, printing only output the user has
/// not seen yet.
fn run(engine: &mut Engine, file: &Path) -> Result<ExitCode, String> {
    let source = read_file(file)?;
    let mut inputs: Vec<String> = Vec::new();
    let mut transcript = Transcript::new(engine.config().echo_inputs);
    let stdin = io::stdin();
    let mut result = engine.submit_run(&source, &[], None).map_err(|err| err.to_string())?;
    loop {
        let mut stdout = io::stdout().lock();
        let fresh = transcript.unseen(&result.stdout);
        stdout.write_all(fresh.as_bytes()).map_err(|err| err.to_string())?;
        if result.status != ExecutionStatus::AwaitingInput {
            stdout.flush().map_err(|err| err.to_string())?;
            break;
        }
        let prompt = result.pending_prompt.clone().unwrap_or_default();
        stdout.write_all(prompt.as_bytes()).map_err(|err| err.to_string())?;
        stdout.flush().map_err(|err| err.to_string())?;
        transcript.prompted(&prompt);

        let mut line = String::new();
        let read = stdin.lock().read_line(&mut line).map_err(|err| err.to_string())?;
        if read == 0 {
            eprintln!();
            eprintln!("error: stdin closed while the program was waiting for input");
            return Ok(ExitCode::FAILURE);
        }
        let value = line.trim_end_matches(['\n', '\r']).to_owned();
        transcript.answered(&value);
        result = engine
            .submit_run(&source, &inputs, Some(&value))
            .map_err(|err| err.to_string())?;
        inputs.push(value);
    }
    eprint!("{}", result.stderr);
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn grade(engine: &mut Engine, file: &Path, cases: &Path) -> Result<ExitCode, String> {
    let source = read_file(file)?;
    let cases_text = read_file(cases)?;
    let (options, cases) = match serde_json::from_str(&cases_text).map_err(|err| format!("{}: {err}", cases.display()))? {
        CasesFile::List(cases) => (BatchOptions::default(), cases),
        CasesFile::WithOptions { options, cases } => (options, cases),
    };
    let results = engine.run_batch(&source, &cases, &options).map_err(|err| err.to_string())?;
    let summary = BatchSummary::of(&results);
    let report = GradeReport {
        summary,
        results: &results,
    };
    let json = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
    println!("{json}");
    eprintln!("{}/{} cases passed", summary.passed, summary.total);
    Ok(if summary.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn call(engine: &Engine, file: &Path, function: &str, args: &[String]) -> Result<ExitCode, String> {
    let source = read_file(file)?;
    let args: Vec<HostValue> = args
        .iter()
        .map(|arg| match serde_json::from_str(arg) {
            Ok(value) => HostValue::from_json_value(value),
            Err(_) => HostValue::from(arg.as_str()),
        })
        .collect();
    let mut challenge = engine.challenge();
    let loaded = challenge.initialize(source);
    print!("{}", challenge.take_output());
    loaded.map_err(|err| err.to_string())?;
    let returned = challenge.invoke(function, &args);
    print!("{}", challenge.take_output());
    challenge.teardown();
    let value = returned.map_err(|err| err.to_string())?;
    println!("{}", value.to_json_value());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(echo_inputs: bool, attempts: &[(&str, &str)], answer: &str) -> String {
        let mut transcript = Transcript::new(echo_inputs);
        let mut terminal = String::new();
        for (stdout, prompt) in attempts {
            terminal.push_str(transcript.unseen(stdout));
            if !prompt.is_empty() {
                terminal.push_str(prompt);
                transcript.prompted(prompt);
                terminal.push_str(answer);
                terminal.push('\n');
                transcript.answered(answer);
            }
        }
        terminal
    }

    #[test]
    fn answers_are_not_printed_twice_when_echoed() {
        let terminal = replay(true, &[("", "Name: "), ("Name: Ada\nHi Ada\n", "")], "Ada");
        assert_eq!(terminal, "Name: Ada\nHi Ada\n");
    }

    #[test]
    fn prompts_are_not_printed_twice() {
        let terminal = replay(false, &[("Hello\n", "Name: "), ("Hello\nName: Hi Ada\n", "")], "Ada");
        assert_eq!(terminal, "Hello\nName: Ada\nHi Ada\n");
    }
}
