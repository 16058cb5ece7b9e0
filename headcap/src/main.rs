use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use structopt::StructOpt;

use headcap::{bake, check_template};

#[derive(StructOpt)]
#[structopt(about = "Head capture toolkit")]
struct Opts {
    #[structopt(
        help = "Log level",
        long,
        default_value = "info",
        possible_values = &["off", "error", "warn", "info", "debug", "trace"]
    )]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    Bake(bake::BakeCommand),
    CheckTemplate(check_template::CheckTemplateCommand),
}

fn main() {
    let opts = Opts::from_args();

    let _ = TermLogger::init(
        opts.log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    let res = match opts.command {
        Command::Bake(command) => command.run(),
        Command::CheckTemplate(command) => command.run(),
    };

    if let Err(err) = res {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
