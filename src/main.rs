use log::{LevelFilter, warn};
use minish::{Args, Config, Interpreter};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

fn init_logging(level: LevelFilter) {
    if level == LevelFilter::Off {
        return;
    }
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Debug)
        .build();
    if let Err(e) = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("minish: cannot set up logging: {}", e);
    }
}

fn main() {
    let config = Config::from_env(argh::from_env::<Args>());
    init_logging(config.log_level);

    let mut shell = Interpreter::from_config(&config);
    let code = match &config.command {
        Some(line) => shell.execute_line(line).exit_code(),
        None => match shell.repl(&config.prompt) {
            Ok(code) => code,
            Err(e) => {
                warn!("line editor failed: {}", e);
                eprintln!("minish: {}", e);
                1
            }
        },
    };
    std::process::exit(code);
}
