use std::fs;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use tera::Interpreter;
use tera::Lexer;
use tera::Value;
use tera::lex::SingleTokenError;
use tera::lex::StringTerminationError;
use tera::lex::UnitTerminationError;

#[derive(Parser, Debug)]
#[command(version, about = "a calculation language for measured quantities")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute a program and show its final value.
    Run { filename: PathBuf },
    /// Dump the token stream.
    Tokenize { filename: PathBuf },
    /// Dump the parsed statements.
    Parse { filename: PathBuf },
}

fn read_source(filename: &PathBuf) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Run { filename } => {
            let file_contents = read_source(&filename)?;
            let value = Interpreter::new(filename.to_str(), &file_contents).run()?;
            if !matches!(value, Value::Void) {
                println!("{value}");
            }
        }
        Commands::Tokenize { filename } => {
            let file_contents = read_source(&filename)?;

            for token in Lexer::new(filename.to_str(), &file_contents) {
                let token = match token {
                    Ok(token) => token,
                    Err(e) => {
                        if let Some(single_token_error) = e.downcast_ref::<SingleTokenError>() {
                            eprintln!(
                                "[line {}] Error: Unexpected character: {}",
                                single_token_error.line(),
                                single_token_error.token
                            );
                            eprintln!("{e:?}");

                            std::process::exit(65);
                        } else if let Some(string_termination_error) =
                            e.downcast_ref::<StringTerminationError>()
                        {
                            eprintln!(
                                "[line {}] Error: Unterminated string",
                                string_termination_error.line()
                            );
                            eprintln!("{e:?}");

                            std::process::exit(65);
                        } else if e.downcast_ref::<UnitTerminationError>().is_some() {
                            eprintln!("Error: Unterminated unit annotation");
                            eprintln!("{e:?}");

                            std::process::exit(65);
                        }
                        return Err(e);
                    }
                };
                println!("{token}");
            }
        }
        Commands::Parse { filename } => {
            let file_contents = read_source(&filename)?;

            let mut parser = tera::Parser::new(filename.to_str(), &file_contents);
            while let Some(statement) = parser.next_statement() {
                let statement = match statement {
                    Ok(statement) => statement,
                    Err(e) => {
                        eprintln!("{e:?}");
                        return Err(e);
                    }
                };
                println!("{}", statement.expr);
            }
        }
    }
    Ok(())
}
