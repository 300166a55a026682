use std::env;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use horn::engine::Engine;

fn main() -> ExitCode {
    let mut args: Vec<String> = env::args().collect();
    let trace = args.iter().any(|arg| arg == "--trace");
    if trace {
        args.retain(|arg| arg != "--trace");
    }
    let max_steps = match extract_max_steps(&mut args) {
        Ok(value) => value,
        Err(()) => return ExitCode::FAILURE,
    };
    let query = match extract_query(&mut args) {
        Ok(value) => value,
        Err(()) => return ExitCode::FAILURE,
    };

    init_logging(trace);

    if args.len() < 2 {
        print_help();
        return ExitCode::SUCCESS;
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => {
            print_help();
            ExitCode::SUCCESS
        }
        "run" => {
            if args.len() < 3 {
                eprintln!("Usage: horn run <file.horn> [-q <query>]");
                return ExitCode::FAILURE;
            }
            run_file(&args[2], query.as_deref(), max_steps)
        }
        "bytecode" => {
            if args.len() < 4 {
                eprintln!("Usage: horn bytecode <file.horn> <name/arity>");
                return ExitCode::FAILURE;
            }
            show_bytecode(&args[2], &args[3], max_steps)
        }
        file => run_file(file, query.as_deref(), max_steps),
    }
}

fn init_logging(trace: bool) {
    let default = if trace { "horn=debug" } else { "horn=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn extract_max_steps(args: &mut Vec<String>) -> Result<Option<u64>, ()> {
    let Some(index) = args.iter().position(|arg| arg == "--max-steps") else {
        return Ok(None);
    };
    if index + 1 >= args.len() {
        eprintln!("--max-steps needs a number");
        return Err(());
    }
    let Ok(value) = args[index + 1].parse::<u64>() else {
        eprintln!("--max-steps needs a number, got {}", args[index + 1]);
        return Err(());
    };
    args.drain(index..=index + 1);
    Ok(Some(value))
}

fn extract_query(args: &mut Vec<String>) -> Result<Option<String>, ()> {
    let Some(index) = args.iter().position(|arg| arg == "-q" || arg == "--query") else {
        return Ok(None);
    };
    if index + 1 >= args.len() {
        eprintln!("-q needs a goal");
        return Err(());
    }
    let query = args[index + 1].clone();
    args.drain(index..=index + 1);
    Ok(Some(query))
}

fn run_file(path: &str, query: Option<&str>, max_steps: Option<u64>) -> ExitCode {
    let mut engine = Engine::new();
    engine.set_step_limit(max_steps);

    if let Err(err) = engine.compile_file(path) {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }

    let Some(query) = query else {
        return ExitCode::SUCCESS;
    };

    let mut solutions = match engine.solve(query) {
        Ok(solutions) => solutions,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    match solutions.next_solution() {
        Ok(Some(bindings)) => {
            if bindings.is_empty() {
                println!("yes");
            } else {
                for (name, term) in &bindings {
                    println!("{} = {}", name, term);
                }
            }
            ExitCode::SUCCESS
        }
        Ok(None) => {
            println!("no");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn show_bytecode(path: &str, indicator: &str, max_steps: Option<u64>) -> ExitCode {
    let Some((name, arity)) = parse_indicator_arg(indicator) else {
        eprintln!("expected name/arity, got {}", indicator);
        return ExitCode::FAILURE;
    };

    let mut engine = Engine::new();
    engine.set_step_limit(max_steps);
    if let Err(err) = engine.compile_file(path) {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }
    match engine.bytecode_listing(&name, arity) {
        Some(listing) => {
            print!("{}", listing);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("unknown predicate {}/{}", name, arity);
            ExitCode::FAILURE
        }
    }
}

fn parse_indicator_arg(text: &str) -> Option<(String, usize)> {
    let (name, arity) = text.rsplit_once('/')?;
    Some((name.to_string(), arity.parse().ok()?))
}

fn print_help() {
    println!("horn - embeddable logic-programming runtime");
    println!();
    println!("Usage:");
    println!("  horn <file.horn> [-q <goal>]        Compile a program, optionally run a goal");
    println!("  horn run <file.horn> [-q <goal>]    Same as above");
    println!("  horn bytecode <file.horn> <p/n>     Show compiled bytecode for a predicate");
    println!();
    println!("Options:");
    println!("  -q, --query <goal>   Goal to run after loading");
    println!("  --trace              Verbose execution tracing (ports, clause selection)");
    println!("  --max-steps <n>      Abort after n predicate calls");
    println!("  -h, --help           Show this help");
}
