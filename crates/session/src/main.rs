use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chess_core::{parse_pgn, write_games, ShakmatyOracle};
use session::input::spawn_stdin;
use session::{run, Config, ProcessFactory, SessionState, TextRenderer};
use tracing::info;
use tracing_subscriber::EnvFilter;

enum Action {
    Play(Option<PathBuf>),
    Validate(PathBuf),
    Print(PathBuf),
    Help,
    Version,
}

fn usage(program: &str) {
    eprintln!("Usage: {program} [-p file] [-V file] [-S file] [-hv]");
    eprintln!();
    eprintln!("  -p file   load the games in file");
    eprintln!("  -V file   validate file and exit");
    eprintln!("  -S file   validate file and print it as PGN");
    eprintln!("  -h        this help");
    eprintln!("  -v        version");
}

fn parse_args(args: &[String]) -> anyhow::Result<Action> {
    let mut action = Action::Play(None);
    let mut i = 1;
    while i < args.len() {
        let file = || {
            args.get(i + 1)
                .map(PathBuf::from)
                .with_context(|| format!("{} requires a file name", args[i]))
        };
        action = match args[i].as_str() {
            "-p" => Action::Play(Some(file()?)),
            "-V" => Action::Validate(file()?),
            "-S" => Action::Print(file()?),
            "-h" => return Ok(Action::Help),
            "-v" => return Ok(Action::Version),
            other => anyhow::bail!("Unknown option: {other}"),
        };
        i += 2;
    }
    Ok(action)
}

fn validate(path: &Path, print: bool) -> anyhow::Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let games = parse_pgn(&text, &ShakmatyOracle)
        .with_context(|| format!("{} is not valid PGN", path.display()))?;

    if print {
        print!("{}", write_games(games.iter().map(|g| (&g.tags, &g.history))));
    } else {
        info!(path = %path.display(), games = games.len(), "File is valid");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout belongs to the board
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map_or("chess-session", String::as_str);

    let file = match parse_args(&args) {
        Ok(Action::Play(file)) => file,
        Ok(Action::Validate(path)) => return validate(&path, false),
        Ok(Action::Print(path)) => return validate(&path, true),
        Ok(Action::Help) => {
            usage(program);
            return Ok(());
        }
        Ok(Action::Version) => {
            println!("{program} {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(e) => {
            usage(program);
            return Err(e);
        }
    };

    let config = Config::from_env();
    info!(engine = %config.engine_cmd, data_dir = %config.data_dir.display(), "Config loaded");

    let engines = ProcessFactory::new(config.engine_cmd.clone());
    let mut state = SessionState::new(config, Box::new(engines))?;
    if let Some(path) = file {
        state
            .load_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let input = spawn_stdin();
        let mut renderer = TextRenderer::new(std::io::stdout());
        run(&mut state, input, &mut renderer).await
    })?;

    Ok(())
}
