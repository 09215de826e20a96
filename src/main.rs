use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use colored::Colorize;

use etwdeck::commands;
use etwdeck::error::EtwError;

fn trace_arg() -> Arg {
    Arg::new("trace")
        .help("Trace name without .etl (defaults to the most recent trace)")
        .index(1)
}

fn build_cli() -> Command {
    Command::new("etwdeck")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Record, manage and post-process ETW traces")
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .short_alias('V')
                .long("version")
                .help("Print version information")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("record")
                .about("Record a trace until Ctrl+C or --duration, then save it")
                .arg(
                    Arg::new("mode")
                        .short('m')
                        .long("mode")
                        .value_name("MODE")
                        .help("Tracing mode: memory, file or heap (saved as the new default)"),
                )
                .arg(
                    Arg::new("duration")
                        .short('d')
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Stop and save after this many seconds")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("save-buffers-every")
                        .long("save-buffers-every")
                        .value_name("SECONDS")
                        .help("When tracing to memory, save the buffers periodically")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
                .arg(
                    Arg::new("discard")
                        .long("discard")
                        .help("Stop without saving the trace")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List traces, most recent first")
                .arg(
                    Arg::new("notes")
                        .short('n')
                        .long("notes")
                        .help("Show each trace's notes")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename a trace, keeping its timestamp prefix unless --full")
                .arg(trace_arg().required(true))
                .arg(
                    Arg::new("name")
                        .help("New name (or the part after the timestamp)")
                        .required(true)
                        .index(2),
                )
                .arg(
                    Arg::new("full")
                        .short('f')
                        .long("full")
                        .help("Replace the whole name, timestamp included")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a trace and its sidecar files")
                .arg(trace_arg().required(true))
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .help("Do not ask for confirmation")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("notes")
                .about("Show or edit a trace's notes")
                .arg(trace_arg())
                .arg(
                    Arg::new("set")
                        .long("set")
                        .value_name("TEXT")
                        .help("Replace the notes")
                        .conflicts_with("append"),
                )
                .arg(
                    Arg::new("append")
                        .long("append")
                        .value_name("TEXT")
                        .help("Append a line to the notes"),
                ),
        )
        .subcommand(
            Command::new("compress")
                .about("Recompress a trace in place when that makes it smaller")
                .arg(trace_arg().conflicts_with("all"))
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .help("Compress every trace")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("strip-symbols")
                .about("Strip Chrome symbol information from a trace")
                .arg(trace_arg()),
        )
        .subcommand(
            Command::new("identify")
                .about("Identify Chrome processes and append them to the notes")
                .arg(trace_arg())
                .arg(
                    Arg::new("cpu")
                        .short('c')
                        .long("cpu")
                        .help("Include CPU usage per process")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("preprocess")
                .about("Build the symbol cache for a trace")
                .arg(trace_arg()),
        )
        .subcommand(
            Command::new("flame-graph")
                .about("Render a CPU sampling flame graph next to the trace")
                .arg(trace_arg()),
        )
        .subcommand(
            Command::new("open")
                .about("Open a trace in a viewer")
                .arg(trace_arg())
                .arg(
                    Arg::new("viewer")
                        .long("viewer")
                        .value_name("VIEWER")
                        .help("wpa, gpuview or mxa (default: wpa)"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change settings")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("show").about("Print the current settings"))
                .subcommand(Command::new("path").about("Print the settings file location"))
                .subcommand(
                    Command::new("set")
                        .about("Set a setting by its key in the settings file")
                        .arg(Arg::new("key").required(true).index(1))
                        .arg(Arg::new("value").required(true).index(2)),
                ),
        )
        .subcommand(Command::new("version").about("Shows version information"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .help("bash, zsh, fish, powershell or elvish")
                        .required(true)
                        .index(1),
                ),
        )
}

fn run() -> Result<()> {
    let matches = build_cli().get_matches();

    if matches.get_flag("version") {
        return commands::version();
    }

    match matches.subcommand() {
        Some(("record", sub_matches)) => commands::record(sub_matches),
        Some(("list", sub_matches)) => commands::traces::list(sub_matches),
        Some(("rename", sub_matches)) => commands::traces::rename(sub_matches),
        Some(("delete", sub_matches)) => commands::traces::delete(sub_matches),
        Some(("notes", sub_matches)) => commands::traces::notes(sub_matches),
        Some(("compress", sub_matches)) => commands::process::compress(sub_matches),
        Some(("strip-symbols", sub_matches)) => commands::process::strip_symbols(sub_matches),
        Some(("identify", sub_matches)) => commands::process::identify(sub_matches),
        Some(("preprocess", sub_matches)) => commands::process::preprocess(sub_matches),
        Some(("flame-graph", sub_matches)) => commands::process::flame_graph(sub_matches),
        Some(("open", sub_matches)) => commands::process::open(sub_matches),
        Some(("config", sub_matches)) => commands::config::execute(sub_matches),
        Some(("version", _)) => commands::version(),
        Some(("completions", sub_matches)) => {
            commands::completions::execute(sub_matches, &mut build_cli())
        }
        _ => {
            println!("Welcome to etwdeck!");
            println!("Use 'etwdeck --help' for more information.");
            Ok(())
        }
    }
}

fn main() {
    etwdeck::init_logging();

    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        let code = match e.downcast_ref::<EtwError>() {
            Some(EtwError::MissingToolchain(_)) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
