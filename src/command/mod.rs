pub mod find;
mod common;

use colored::Colorize;
use crate::{Error, err::error};
use common::{print_version, fmt_def};

fn print_help() {
    print_version();
    println!("\n{} {} command [arguments]",
        "Usage:".bold(), env!("CARGO_PKG_NAME"));

    println!("\n{}", "[ Amplicon discovery ]".bold());
    println!("    {:<7}  Find conserved k-mer pairs and score candidate amplicons.", "find".red());

    println!("\n{}", "[ General help ]".bold());
    println!("    {:<7}  Show this help message.", "help".red());
    println!("    {:<7}  Show version.", "version".red());
}

pub fn run(argv: &[String]) -> Result<(), Error> {
    if argv.len() <= 1 {
        print_help();
        std::process::exit(1);
    }
    match &argv[1] as &str {
        "find" => find::run(&argv[2..])?,
        "help" | "h" | "--help" | "-h" => print_help(),
        "version" | "--version" | "-V" => print_version(),
        cmd => {
            print_help();
            return Err(error!(InvalidInput, "Unknown command {}", cmd));
        }
    }
    Ok(())
}
