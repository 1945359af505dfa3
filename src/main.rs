use jvm2wasm::graph::text::{parse_method, ParseError};
use jvm2wasm::structure::{self, Diagnostics, GraphStore, MethodContext, NoDiagnostics};
use jvm2wasm::wasm::render_lines;

use clap::{Arg, ArgAction, Command};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
enum CliError {
    Io(PathBuf, io::Error),
    Parse(PathBuf, ParseError),
    Structure(structure::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io(path, err) => write!(f, "{}: {}", path.display(), err),
            CliError::Parse(path, err) => write!(f, "{}: {}", path.display(), err),
            CliError::Structure(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CliError {}

impl From<structure::Error> for CliError {
    fn from(err: structure::Error) -> CliError {
        CliError::Structure(err)
    }
}

fn main() -> Result<(), CliError> {
    env_logger::init();

    let matches = Command::new("JVM to WASM control flow structurer")
        .version(clap::crate_version!())
        .about("Turns the basic blocks of a translated JVM method into structured WASM code")
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("FILE")
                .help("Write the structured code here instead of standard output"),
        )
        .arg(
            Arg::new("allow-duplication")
                .long("allow-duplication")
                .action(ArgAction::SetTrue)
                .help("Inline nodes into several predecessors when that avoids a fallback"),
        )
        .arg(
            Arg::new("strict-references")
                .long("strict-references")
                .action(ArgAction::SetTrue)
                .help("Don't treat references and i32 values as interchangeable"),
        )
        .arg(
            Arg::new("validate-steps")
                .long("validate-steps")
                .action(ArgAction::SetTrue)
                .help("Check the whole graph after every rewrite"),
        )
        .arg(
            Arg::new("comments")
                .long("comments")
                .action(ArgAction::SetTrue)
                .help("Annotate the generated code with comments"),
        )
        .arg(
            Arg::new("graph-dir")
                .long("graph-dir")
                .value_name("DIR")
                .help("Save graphs which needed the dispatch loop fallback into this folder"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Sets the method graph file to structure")
                .required(true)
                .index(1),
        )
        .get_matches();

    let mut settings = structure::Settings::new();
    let flags = [
        ("allow-duplication", structure::StructureFlags::ALLOW_DUPLICATION),
        ("strict-references", structure::StructureFlags::STRICT_REFERENCES),
        ("validate-steps", structure::StructureFlags::VALIDATE_STEPS),
        ("comments", structure::StructureFlags::COMMENTS),
    ];
    for (name, flag) in flags {
        settings.flags.set(flag, matches.get_flag(name));
    }

    let graph_store = matches
        .get_one::<String>("graph-dir")
        .map(|folder| GraphStore::new(folder.as_str()));
    let diagnostics: &dyn Diagnostics = match &graph_store {
        Some(graph_store) => graph_store,
        None => &NoDiagnostics,
    };

    // `INPUT` is required, so clap has already rejected a missing one
    let input_file = PathBuf::from(
        matches
            .get_one::<String>("INPUT")
            .map_or("", String::as_str),
    );
    log::info!("Reading and structuring '{}'", input_file.display());
    let source =
        fs::read_to_string(&input_file).map_err(|err| CliError::Io(input_file.clone(), err))?;
    let parsed = parse_method(&source).map_err(|err| CliError::Parse(input_file.clone(), err))?;

    let mut ctx = MethodContext::new(parsed.signature, parsed.locals, &settings, diagnostics);
    let node = structure::structure(parsed.graph, &mut ctx)?;

    let mut output = format!(";; {}\n", ctx.signature);
    for line in render_lines(&node.body, &ctx.locals) {
        output.push_str(&line);
        output.push('\n');
    }

    // Write out the results
    match matches.get_one::<String>("output") {
        Some(output_file) => {
            log::info!("Writing '{}'", output_file);
            fs::write(output_file, output)
                .map_err(|err| CliError::Io(PathBuf::from(output_file), err))?;
        }
        None => print!("{}", output),
    }

    Ok(())
}
