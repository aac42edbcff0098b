// File: src/main.rs
//
// CLI front end for the execution engine. Trimmed from the teacher's
// `clap`-derived `Cli`/`Commands` shape to the subcommands this core can
// honor standalone: `Run` executes a hand-assembled demo program (there is
// no lexer/parser/compiler in this core, per spec.md §1), `Repl` reports
// that a front end is required, and `Bench` microbenchmarks the TAC loop.
// `Test`/`TestRun`/`Profile`/JIT subcommands are dropped — see DESIGN.md.

use clap::{Parser as ClapParser, Subcommand};
use ministac::errors::{EngineError, ErrorKind};
use ministac::host::{install_demo_intrinsics, Interpreter};
use ministac::line::{Line, OpCode};
use ministac::machine::RunState;
use ministac::value::Value;

#[derive(ClapParser)]
#[command(
    name = "ministac",
    about = "A MiniScript-style TAC execution engine",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Run the built-in demo program (`x = 2 + 3 * 4; print(x)`), since
    /// there is no source-text compiler in this core.
    Run {
        /// Maximum TAC steps to execute before giving up.
        #[arg(long, default_value_t = 6000)]
        step_limit: usize,
    },

    /// Report that an interactive REPL needs a lexer/parser front end.
    Repl,

    /// Run the demo program `iterations` times and report elapsed time.
    Bench {
        #[arg(short, long, default_value_t = 1000)]
        iterations: usize,
    },
}

fn demo_program(interp: &Interpreter) -> Value {
    let vm = &interp.machine;
    let print_intrinsic = vm.intrinsics().find_by_name("print").unwrap();
    let print_func = vm.intrinsics().get_func(&print_intrinsic);

    // x = 2 + 3 * 4; print(x)
    let code = vec![
        Line::new(Some(Value::Temp(0)), OpCode::ATimesB, Some(vm.new_number(3.0)), Some(vm.new_number(4.0)), 1),
        Line::new(Some(Value::Temp(1)), OpCode::APlusB, Some(vm.new_number(2.0)), Some(Value::Temp(0)), 1),
        Line::new(Some(Value::var("x")), OpCode::AssignA, Some(Value::Temp(1)), None, 1),
        Line::new(None, OpCode::PushParam, Some(Value::var("x")), None, 2),
        Line::new(Some(Value::Temp(2)), OpCode::CallFunctionA, Some(print_func), Some(vm.new_number(1.0)), 2),
    ];
    interp.compile_function(vec![], code)
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { step_limit } => {
            let interp = Interpreter::new();
            install_demo_intrinsics(&interp.machine);
            let func = demo_program(&interp);
            interp.load(func).expect("demo program is a Function value");
            match interp.run_until_done(step_limit, false) {
                RunState::Finished => {}
                RunState::StepLimitReached => {
                    eprintln!("step limit of {} reached before completion", step_limit);
                    std::process::exit(1);
                }
                RunState::Suspended => unreachable!("run() never requests early return"),
            }
        }
        Commands::Repl => {
            eprintln!(
                "{}",
                EngineError::new(
                    ErrorKind::CompilerError,
                    "interactive REPL requires a lexer/parser front end, which is out of scope for this core",
                )
            );
            std::process::exit(1);
        }
        Commands::Bench { iterations } => {
            let start = std::time::Instant::now();
            for _ in 0..iterations {
                let interp = Interpreter::new();
                install_demo_intrinsics(&interp.machine);
                let func = demo_program(&interp);
                interp.load(func).unwrap();
                interp.run_until_done(6000, false);
            }
            let elapsed = start.elapsed();
            println!("{} iterations in {:?} ({:?}/iter)", iterations, elapsed, elapsed / iterations as u32);
        }
    }
}
