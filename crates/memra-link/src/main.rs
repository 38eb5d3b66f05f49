//! CLI entry point for the board control tool.

use std::env;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use memra_core as _;
use memra_link::{
    init_tracing, program_element, test_matrix, BoardClient, ClientConfig, ProgramRequest,
    RequestServer,
};
use thiserror as _;
use tracing as _;
use tracing_subscriber as _;

const USAGE_TEXT: &str = "\
Usage: memra-ctl <command> [options]

Commands:
  serve                      Host the register space and device simulation
  selftest                   Run the matrix self-test and print resistances
  program                    Program one matrix element

Options:
  --host <addr>              Server host (default: localhost)
  --port <port>              Server port (default: 49094)
  --target <kohm>            Target resistance in kOhm (program only)
  --element <0..15>          Element index (program only)
  --tolerance <pct>          Tolerance in percent (default: 0)
  --attempts <0..7>          Attempt budget (default: 1)
  --history                  Record the programming ramp (program only)
  -h, --help                 Show this help message

Examples:
  memra-ctl serve --port 49094
  memra-ctl selftest
  memra-ctl program --target 5.0 --element 3 --history
";

#[derive(Debug, PartialEq)]
enum Command {
    Serve,
    SelfTest,
    Program(ProgramRequest),
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    command: Command,
    host: String,
    port: u16,
}

fn parse_args(args: &[String]) -> Result<Option<CliArgs>, String> {
    let mut iter = args.iter();
    let Some(command_name) = iter.next() else {
        return Err("missing command".to_owned());
    };
    if command_name == "-h" || command_name == "--help" {
        return Ok(None);
    }

    let mut host = "localhost".to_owned();
    let mut port = 49094_u16;
    let mut target_kohm = None;
    let mut element = None;
    let mut tolerance_pct = 0.0_f64;
    let mut attempts = 1_u8;
    let mut history = false;

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "--history" => history = true,
            "--host" => host = take_value(&mut iter, flag)?,
            "--port" => port = parse_value(&mut iter, flag)?,
            "--target" => target_kohm = Some(parse_value(&mut iter, flag)?),
            "--element" => element = Some(parse_value(&mut iter, flag)?),
            "--tolerance" => tolerance_pct = parse_value(&mut iter, flag)?,
            "--attempts" => attempts = parse_value(&mut iter, flag)?,
            other => return Err(format!("unknown option: {other}")),
        }
    }

    let command = match command_name.as_str() {
        "serve" => Command::Serve,
        "selftest" => Command::SelfTest,
        "program" => {
            let target_kohm = target_kohm.ok_or("program requires --target")?;
            let element = element.ok_or("program requires --element")?;
            Command::Program(ProgramRequest {
                target_kohm,
                tolerance_pct,
                attempts,
                save_history: history,
                element,
            })
        }
        other => return Err(format!("unknown command: {other}")),
    };

    Ok(Some(CliArgs {
        command,
        host,
        port,
    }))
}

fn take_value(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<String, String> {
    iter.next()
        .map(String::clone)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_value<T: std::str::FromStr>(
    iter: &mut std::slice::Iter<'_, String>,
    flag: &str,
) -> Result<T, String> {
    take_value(iter, flag)?
        .parse()
        .map_err(|_| format!("{flag} has an invalid value"))
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "")
}

/// Spawns the local debug server when targeting loopback, mirroring the
/// desktop tool's behavior of hosting its own board.
fn start_local_server(host: &str, port: u16) -> bool {
    if !is_loopback(host) {
        return false;
    }
    eprintln!("starting a local server on port {port}...");
    let addr = format!("127.0.0.1:{port}");
    match RequestServer::bind(addr) {
        Ok(server) => {
            let spawned = thread::Builder::new()
                .name("request-server".to_owned())
                .spawn(move || {
                    if let Err(err) = server.run() {
                        eprintln!("server failed: {err}");
                    }
                });
            if spawned.is_err() {
                eprintln!("can't start the local server");
                return false;
            }
            thread::sleep(Duration::from_millis(100));
            true
        }
        Err(err) => {
            eprintln!("can't bind the local server: {err}");
            false
        }
    }
}

fn run_client_command(args: &CliArgs) -> ExitCode {
    let local = start_local_server(&args.host, args.port);
    let mut client = BoardClient::new(ClientConfig {
        host: args.host.clone(),
        port: args.port,
        ..ClientConfig::default()
    });
    if let Err(err) = client.connect_blocking() {
        eprintln!("connection failed: {err}");
        return ExitCode::FAILURE;
    }

    match &args.command {
        Command::SelfTest => {
            let values = test_matrix(&mut client);
            for (i, value) in values.iter().enumerate() {
                println!("memristor {:2}: {value:8.2} kOhm", i + 1);
            }
        }
        Command::Program(request) => {
            let outcome = program_element(&mut client, request);
            println!(
                "element {} programmed to {:.2} kOhm",
                request.element, outcome.final_kohm
            );
            if request.save_history {
                let recorded = outcome
                    .history_kohm
                    .iter()
                    .filter(|value| **value > 0.0)
                    .count();
                println!("ramp history: {recorded} recorded steps");
            }
        }
        Command::Serve => unreachable!("serve is handled before connecting"),
    }

    if local {
        if let Err(err) = client.stop_server() {
            eprintln!("server shutdown failed: {err}");
        }
    } else {
        client.close();
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    let parsed = match parse_args(&args) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            print!("{USAGE_TEXT}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("error: {err}");
            eprint!("{USAGE_TEXT}");
            return ExitCode::FAILURE;
        }
    };

    match parsed.command {
        Command::Serve => {
            let addr = format!("{}:{}", parsed.host, parsed.port);
            let server = match RequestServer::bind(&addr) {
                Ok(server) => server,
                Err(err) => {
                    eprintln!("can't bind {addr}: {err}");
                    return ExitCode::FAILURE;
                }
            };
            eprintln!("serving on {addr}");
            match server.run() {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("server failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::SelfTest | Command::Program(_) => run_client_command(&parsed),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_args, CliArgs, Command};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn parses_serve_with_port() {
        let parsed = parse_args(&args(&["serve", "--port", "5000"])).unwrap().unwrap();
        assert_eq!(
            parsed,
            CliArgs {
                command: Command::Serve,
                host: "localhost".to_owned(),
                port: 5000,
            }
        );
    }

    #[test]
    fn parses_program_options() {
        let parsed = parse_args(&args(&[
            "program",
            "--target",
            "5.0",
            "--element",
            "3",
            "--tolerance",
            "10",
            "--history",
        ]))
        .unwrap()
        .unwrap();
        match parsed.command {
            Command::Program(request) => {
                assert!((request.target_kohm - 5.0).abs() < f64::EPSILON);
                assert_eq!(request.element, 3);
                assert!((request.tolerance_pct - 10.0).abs() < f64::EPSILON);
                assert!(request.save_history);
                assert_eq!(request.attempts, 1);
            }
            other => panic!("expected a program command, got {other:?}"),
        }
    }

    #[test]
    fn program_requires_target_and_element() {
        assert!(parse_args(&args(&["program", "--target", "5.0"])).is_err());
        assert!(parse_args(&args(&["program", "--element", "3"])).is_err());
    }

    #[test]
    fn help_and_unknown_commands_are_distinguished() {
        assert!(parse_args(&args(&["--help"])).unwrap().is_none());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
    }
}
