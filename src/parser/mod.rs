use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;

use crate::config::stream::{LineKind, LogLine};

enum Needles {
    Any(&'static [&'static str]),
    All(&'static [&'static str]),
}

impl Needles {
    fn matches(&self, lowered: &str) -> bool {
        match self {
            Needles::Any(needles) => needles.iter().any(|n| lowered.contains(n)),
            Needles::All(needles) => needles.iter().all(|n| lowered.contains(n)),
        }
    }
}

/// Ordered classification rules; the first matching rule wins.
const RULES: &[(LineKind, Needles)] = &[
    (LineKind::Error, Needles::Any(&["error", "severe"])),
    (LineKind::Warning, Needles::Any(&["warn"])),
    (LineKind::Success, Needles::All(&["done ", "for help"])),
    (LineKind::Info, Needles::Any(&["info"])),
    (LineKind::Debug, Needles::Any(&["debug"])),
    (LineKind::Eula, Needles::Any(&["eula"])),
    (LineKind::Critical, Needles::Any(&["fail", "exception", "traceback"])),
    (LineKind::Startup, Needles::Any(&["starting", "started"])),
    (LineKind::Shutdown, Needles::Any(&["stopping", "stopped"])),
];

static PLAYER_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"There are (\d+) (?:of a max of|out of maximum) (\d+) players online[.:]?(.*)$")
        .expect("player list pattern is valid")
});

/// Case-insensitive console classification of a raw output line.
pub fn classify(line: &str) -> LineKind {
    let lowered = line.to_lowercase();

    RULES
        .iter()
        .find(|(_, needles)| needles.matches(&lowered))
        .map(|(kind, _)| *kind)
        .unwrap_or(LineKind::Default)
}

/// True when the line carries the configured ready sentinel.
pub fn is_ready(line: &LogLine, sentinel: &str) -> bool {
    !sentinel.is_empty() && line.text.contains(sentinel)
}

/// Reply of the `list` console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerList {
    pub online: u32,
    pub max: u32,
    pub players: BTreeSet<String>,
}

pub fn parse_player_list(line: &LogLine) -> Option<PlayerList> {
    let msg = line.message();
    let caps = PLAYER_LIST.captures(&msg)?;

    let online = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let max = caps.get(2)?.as_str().parse::<u32>().ok()?;
    let players = caps
        .get(3)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    Some(PlayerList {
        online,
        max,
        players,
    })
}
