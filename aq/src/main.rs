use clap::{Parser as ClapParser, Subcommand};
use std::{fs, process};

use aq::{BuiltinRegistry, Program, VMCreateInfo, Vm, codec};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Maximum number of nested calls before execution faults
    #[arg(long, global = true, help = "Call depth limit")]
    max_depth: Option<usize>,

    /// Largest array a program may allocate or grow
    #[arg(long, global = true, help = "Array element limit")]
    max_elements: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute the entry function of a bytecode file
    Run { file: String },
    /// Print the mnemonic form of a bytecode file
    Dump { file: String },
}

fn load(filename: &str) -> Program {
    let bytes = match fs::read(filename) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Error reading file '{}': {}", filename, err);
            process::exit(1);
        }
    };
    match codec::decode(&bytes) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("Error decoding {}: {}", filename, err);
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Dump { file } => {
            print!("{}", load(&file).mnemonic());
        }
        Command::Run { file } => {
            let program = load(&file);
            let mut info = VMCreateInfo::default();
            if let Some(max_depth) = cli.max_depth {
                info.max_depth = max_depth;
            }
            if let Some(max_elements) = cli.max_elements {
                info.max_elements = max_elements;
            }
            let result = Vm::new(program, BuiltinRegistry::with_defaults(), info)
                .and_then(|mut vm| vm.run());
            if let Err(err) = result {
                eprintln!("Error running {}: {}", file, err);
                process::exit(1);
            }
        }
    }
}
