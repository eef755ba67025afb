use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub engine_cmd: String,
    pub engine_init: Vec<String>,
    pub engine_quit: String,
    /// Starts a search for the side to move.
    pub engine_go: String,
    /// Position reset; `{fen}` is replaced by the current position.
    pub engine_setboard: String,
    /// Send moves to the engine as SAN instead of coordinate notation.
    pub engine_san: bool,
    pub save_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub jump_count: usize,
    pub poll_timeout: Duration,
    pub clock_tick: Duration,
    pub delete_prompt: bool,
    pub exit_prompt: bool,
    /// `[mode:]trigger=keys` definitions separated by `|`.
    pub macros: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; missing or unparsable values fall back
    /// to the defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str, default: bool| {
            var(name)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default)
        };
        let millis = |name: &str, default: u64| {
            Duration::from_millis(var(name).and_then(|v| v.parse().ok()).unwrap_or(default))
        };

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| var("HOME").map(|home| PathBuf::from(home).join(".chess-session")))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            engine_cmd: var("ENGINE_CMD").unwrap_or_else(|| "gnuchess --xboard".to_string()),
            engine_init: var("ENGINE_INIT")
                .unwrap_or_else(|| "xboard;protover 2".to_string())
                .split(';')
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
            engine_quit: var("ENGINE_QUIT").unwrap_or_else(|| "quit".to_string()),
            engine_go: var("ENGINE_GO").unwrap_or_else(|| "go".to_string()),
            engine_setboard: var("ENGINE_SETBOARD").unwrap_or_else(|| "setboard {fen}".to_string()),
            engine_san: var("ENGINE_MOVES").is_some_and(|v| v.eq_ignore_ascii_case("san")),
            save_dir: var("SAVE_DIR").map(PathBuf::from),
            data_dir,
            jump_count: var("JUMP_COUNT")
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(10),
            poll_timeout: millis("POLL_TIMEOUT_MS", 500),
            clock_tick: millis("CLOCK_TICK_MS", 100),
            delete_prompt: flag("DELETE_PROMPT", true),
            exit_prompt: flag("EXIT_PROMPT", true),
            macros: var("MACROS").unwrap_or_default(),
        }
    }

    /// Directory relative save paths are resolved against.
    pub fn save_root(&self) -> &PathBuf {
        self.save_dir.as_ref().unwrap_or(&self.data_dir)
    }

    pub fn setboard_command(&self, fen: &str) -> String {
        self.engine_setboard.replace("{fen}", fen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/me")]));
        assert_eq!(config.engine_cmd, "gnuchess --xboard");
        assert_eq!(config.engine_init, ["xboard", "protover 2"]);
        assert_eq!(config.jump_count, 10);
        assert_eq!(config.clock_tick, Duration::from_millis(100));
        assert_eq!(config.data_dir, PathBuf::from("/home/me/.chess-session"));
        assert!(config.exit_prompt);
        assert!(!config.engine_san);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("ENGINE_INIT", "uci; isready ;"),
            ("JUMP_COUNT", "zero"),
            ("EXIT_PROMPT", "no"),
            ("SAVE_DIR", "/tmp/games"),
            ("ENGINE_MOVES", "SAN"),
        ]));
        assert_eq!(config.engine_init, ["uci", "isready"]);
        assert_eq!(config.jump_count, 10);
        assert!(!config.exit_prompt);
        assert!(config.engine_san);
        assert_eq!(config.save_root(), &PathBuf::from("/tmp/games"));
    }

    #[test]
    fn test_setboard_template() {
        let config = Config::default();
        assert_eq!(config.setboard_command("8/8 w - - 0 1"), "setboard 8/8 w - - 0 1");
    }
}
