//! Nested key macro expansion.
//!
//! A real key matching a macro trigger is replaced by the macro's first key,
//! and matching repeats on the replacement, so one macro can start another.
//! Every started macro is pushed on the depth stack. When the innermost one
//! runs out, the stack unwinds to the next outer macro that still has keys.
//! After a full unwind all cursors go back to zero.

use crate::error::SessionError;
use crate::game::Mode;
use crate::keys::{parse_keys, Key};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    /// `None` matches in every mode.
    pub mode: Option<Mode>,
    pub trigger: Key,
    pub keys: Vec<Key>,
    n: usize,
}

impl Macro {
    pub fn new(mode: Option<Mode>, trigger: Key, keys: Vec<Key>) -> Self {
        Self {
            mode,
            trigger,
            keys,
            n: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.n
    }

    fn take(&mut self) -> Option<Key> {
        let key = self.keys.get(self.n).copied();
        if key.is_some() {
            self.n += 1;
        }
        key
    }

    /// Parse `[mode:]trigger=keys`, where the mode is one of `play`,
    /// `history`, `edit` or `any`.
    pub fn parse(def: &str) -> Result<Self, SessionError> {
        let invalid = || SessionError::Macro(def.to_string());

        let (head, body) = def.split_once('=').ok_or_else(invalid)?;
        let (mode, trigger) = match head.split_once(':') {
            Some((mode, trigger)) if !mode.is_empty() && !trigger.is_empty() => {
                let mode = match mode.trim().to_ascii_lowercase().as_str() {
                    "play" => Some(Mode::Play),
                    "history" => Some(Mode::History),
                    "edit" => Some(Mode::Edit),
                    "any" => None,
                    _ => return Err(invalid()),
                };
                (mode, trigger)
            }
            _ => (None, head),
        };

        let trigger = match parse_keys(trigger)?.as_slice() {
            [key] => *key,
            _ => return Err(invalid()),
        };
        let keys = parse_keys(body)?;
        if keys.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(mode, trigger, keys))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MacroPlayer {
    macros: Vec<Macro>,
    stack: Vec<usize>,
    matched: Option<usize>,
}

impl MacroPlayer {
    pub fn new(macros: Vec<Macro>) -> Self {
        Self {
            macros,
            stack: Vec::new(),
            matched: None,
        }
    }

    /// Parse `|`-separated definitions. Blank entries are skipped.
    pub fn parse(spec: &str) -> Result<Self, SessionError> {
        let macros = spec
            .split('|')
            .map(str::trim)
            .filter(|def| !def.is_empty())
            .map(Macro::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(macros))
    }

    pub fn macros(&self) -> &[Macro] {
        &self.macros
    }

    /// Whether an expansion is in progress.
    pub fn is_active(&self) -> bool {
        self.matched.is_some()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Resolve a key through the macro triggers. `mode` is `None` while a
    /// prompt is pending, which suspends matching.
    pub fn feed(&mut self, mut key: Key, mode: Option<Mode>) -> Key {
        let Some(mode) = mode else {
            return key;
        };

        'again: loop {
            for i in 0..self.macros.len() {
                let m = &mut self.macros[i];
                if m.trigger != key || m.mode.is_some_and(|only| only != mode) {
                    continue;
                }
                let Some(next) = m.take() else {
                    continue;
                };
                key = next;

                if self.stack.is_empty() {
                    if let Some(outer) = self.matched {
                        self.stack.push(outer);
                    }
                }
                self.stack.push(i);
                self.matched = Some(i);
                continue 'again;
            }
            return key;
        }
    }

    /// Next synthesized key of the running expansion, `None` once every
    /// macro on the stack is used up.
    pub fn next_key(&mut self, mode: Option<Mode>) -> Option<Key> {
        let current = self.matched?;

        if let Some(key) = self.macros[current].take() {
            return Some(self.feed(key, mode));
        }

        while let Some(outer) = self.stack.pop() {
            self.matched = Some(outer);
            if let Some(key) = self.macros[outer].take() {
                return Some(self.feed(key, mode));
            }
        }

        self.reset();
        None
    }

    /// Drop any expansion in progress.
    pub fn reset(&mut self) {
        for m in &mut self.macros {
            m.n = 0;
        }
        self.stack.clear();
        self.matched = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(player: &mut MacroPlayer, first: Key) -> Vec<Key> {
        let mut out = vec![player.feed(first, Some(Mode::Play))];
        while let Some(key) = player.next_key(Some(Mode::Play)) {
            out.push(key);
        }
        out
    }

    fn chars(keys: &[Key]) -> String {
        keys.iter()
            .map(|k| match k {
                Key::Char(c) => *c,
                _ => '?',
            })
            .collect()
    }

    #[test]
    fn test_parse_definitions() {
        let player = MacroPlayer::parse("play:X=e2e4 | history:^a=<right><right> | Z=Q").unwrap();
        let m = player.macros();
        assert_eq!(m.len(), 3);
        assert_eq!(m[0].mode, Some(Mode::Play));
        assert_eq!(m[0].trigger, Key::Char('X'));
        assert_eq!(m[1].trigger, Key::Ctrl('a'));
        assert_eq!(m[1].keys, vec![Key::Right, Key::Right]);
        assert_eq!(m[2].mode, None);

        assert!(MacroPlayer::parse("X=").is_err());
        assert!(MacroPlayer::parse("XY=a").is_err());
        assert!(MacroPlayer::parse("bogus:X=a").is_err());
        assert!(MacroPlayer::parse("no equals").is_err());
    }

    #[test]
    fn test_single_macro_expands_in_order() {
        let mut player = MacroPlayer::parse("X=abc").unwrap();
        let keys = drain(&mut player, Key::Char('X'));
        assert_eq!(chars(&keys), "abc");
        assert!(!player.is_active());
    }

    #[test]
    fn test_unmatched_key_passes_through() {
        let mut player = MacroPlayer::parse("X=abc").unwrap();
        assert_eq!(player.feed(Key::Char('y'), Some(Mode::Play)), Key::Char('y'));
        assert!(!player.is_active());
        assert_eq!(player.next_key(Some(Mode::Play)), None);
    }

    #[test]
    fn test_nested_macros_resume_outer() {
        // A starts B in the middle, B starts C at its end.
        let mut player = MacroPlayer::parse("A=1B2|B=3C|C=45").unwrap();
        let keys = drain(&mut player, Key::Char('A'));
        assert_eq!(chars(&keys), "13452");
        assert!(!player.is_active());
        assert_eq!(player.depth(), 0);
        assert!(player.macros().iter().all(|m| m.cursor() == 0));
    }

    #[test]
    fn test_macro_starting_with_another_macro() {
        let mut player = MacroPlayer::parse("A=Bz|B=xy").unwrap();
        let keys = drain(&mut player, Key::Char('A'));
        assert_eq!(chars(&keys), "xyz");
        assert!(player.macros().iter().all(|m| m.cursor() == 0));
    }

    #[test]
    fn test_mode_filter() {
        let mut player = MacroPlayer::parse("history:X=ab").unwrap();
        assert_eq!(player.feed(Key::Char('X'), Some(Mode::Play)), Key::Char('X'));
        assert_eq!(player.feed(Key::Char('X'), Some(Mode::History)), Key::Char('a'));
    }

    #[test]
    fn test_suspended_matching() {
        let mut player = MacroPlayer::parse("X=ab|b=c").unwrap();
        assert_eq!(player.feed(Key::Char('X'), None), Key::Char('X'));

        assert_eq!(player.feed(Key::Char('X'), Some(Mode::Play)), Key::Char('a'));
        // Inside a prompt the expansion continues but `b` is not expanded.
        assert_eq!(player.next_key(None), Some(Key::Char('b')));
        assert_eq!(player.next_key(None), None);
    }

    #[test]
    fn test_reset_abandons_expansion() {
        let mut player = MacroPlayer::parse("X=abc").unwrap();
        player.feed(Key::Char('X'), Some(Mode::Play));
        assert!(player.is_active());
        player.reset();
        assert!(!player.is_active());
        assert_eq!(player.macros()[0].cursor(), 0);
    }
}
