//! Results logs and pairing.
//!
//! Each engine keeps a space-separated log of result tokens such as
//! `+1 =2 -1`: outcome character followed by the opponent's index in the
//! match file. Pairing and standings are both derived from these logs.

use crate::config::EngineConfig;
use std::fmt;
use std::str::FromStr;

/// Game outcome from one engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    pub fn symbol(self) -> char {
        match self {
            Outcome::Win => '+',
            Outcome::Loss => '-',
            Outcome::Draw => '=',
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }
}

/// One entry of a results log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultToken {
    pub outcome: Outcome,
    pub opponent: usize,
}

impl FromStr for ResultToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let outcome = match chars.next() {
            Some('+') => Outcome::Win,
            Some('-') => Outcome::Loss,
            Some('=') => Outcome::Draw,
            _ => return Err(format!("bad outcome in result token '{}'", s)),
        };
        let opponent = chars
            .as_str()
            .parse()
            .map_err(|_| format!("bad opponent in result token '{}'", s))?;
        Ok(Self { outcome, opponent })
    }
}

impl fmt::Display for ResultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.outcome.symbol(), self.opponent)
    }
}

/// Tokens of a results log. Malformed tokens are skipped.
pub fn parse_results(results: &str) -> impl Iterator<Item = ResultToken> + '_ {
    results.split_whitespace().filter_map(|token| token.parse().ok())
}

/// Number of recorded games in a results log.
pub fn games_played(results: &str) -> usize {
    parse_results(results).count()
}

/// Games `engine`'s log records against `opponent`.
pub fn head_to_head(engines: &[EngineConfig], engine: usize, opponent: usize) -> usize {
    engines.get(engine).map_or(0, |config| {
        parse_results(&config.results)
            .filter(|token| token.opponent == opponent)
            .count()
    })
}

/// Picks the next pairing as `(white, black)` indices.
///
/// The engine with the fewest recorded games plays the opponent it has met
/// least often (lowest index wins ties in both steps). Colors alternate with
/// the parity of their previous meetings. Needs at least two engines.
pub fn choose_engines(engines: &[EngineConfig]) -> Option<(usize, usize)> {
    if engines.len() < 2 {
        return None;
    }

    let first = (0..engines.len()).min_by_key(|&i| (games_played(&engines[i].results), i))?;
    let second = (0..engines.len())
        .filter(|&i| i != first)
        .min_by_key(|&i| (head_to_head(engines, first, i), i))?;

    let (a, b) = (first.min(second), first.max(second));
    if head_to_head(engines, a, b) % 2 == 0 {
        Some((a, b))
    } else {
        Some((b, a))
    }
}

/// Appends `token` to a results log.
pub fn record_result(results: &mut String, token: ResultToken) {
    if !results.trim_end().is_empty() {
        results.truncate(results.trim_end().len());
        results.push(' ');
    } else {
        results.clear();
    }
    results.push_str(&token.to_string());
}

/// Win/draw/loss totals for one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub wins: usize,
    pub draws: usize,
    pub losses: usize,
}

impl Tally {
    pub fn from_results(results: &str) -> Self {
        parse_results(results).fold(Self::default(), |mut tally, token| {
            match token.outcome {
                Outcome::Win => tally.wins += 1,
                Outcome::Draw => tally.draws += 1,
                Outcome::Loss => tally.losses += 1,
            }
            tally
        })
    }

    pub fn games(&self) -> usize {
        self.wins + self.draws + self.losses
    }

    /// Wins plus half the draws.
    pub fn score(&self) -> f64 {
        self.wins as f64 + self.draws as f64 / 2.0
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WDL: {}-{}-{}", self.wins, self.draws, self.losses)
    }
}

/// One row of the match standings.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub index: usize,
    pub name: String,
    pub tally: Tally,
}

/// Standings in match-file order.
pub fn standings(engines: &[EngineConfig]) -> Vec<Standing> {
    engines
        .iter()
        .enumerate()
        .map(|(index, engine)| Standing {
            index,
            name: engine.display_name(),
            tally: Tally::from_results(&engine.results),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn engines(results: &[&str]) -> Vec<EngineConfig> {
        results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut engine = EngineConfig::new(format!("/engines/e{}", i));
                engine.results = r.to_string();
                engine
            })
            .collect()
    }

    #[test]
    fn test_parse_token() {
        let token: ResultToken = "+12".parse().unwrap();
        assert_eq!(token.outcome, Outcome::Win);
        assert_eq!(token.opponent, 12);
        assert_eq!(token.to_string(), "+12");
        assert!("x1".parse::<ResultToken>().is_err());
        assert!("=".parse::<ResultToken>().is_err());
    }

    #[test]
    fn test_malformed_tokens_skipped() {
        assert_eq!(games_played("+1  junk =0 -"), 2);
    }

    #[test]
    fn test_fresh_match_pairs_first_two() {
        assert_eq!(choose_engines(&engines(&["", ""])), Some((0, 1)));
        assert_eq!(choose_engines(&engines(&["", "", ""])), Some((0, 1)));
    }

    #[test]
    fn test_needs_two_engines() {
        assert_eq!(choose_engines(&engines(&[])), None);
        assert_eq!(choose_engines(&engines(&["+1"])), None);
    }

    #[test]
    fn test_colors_alternate() {
        assert_eq!(choose_engines(&engines(&["+1", "-0"])), Some((1, 0)));
        assert_eq!(choose_engines(&engines(&["+1 =1", "-0 =0"])), Some((0, 1)));
    }

    #[test]
    fn test_least_played_engine_goes_next() {
        // Engines 0 and 1 have played; 2 is fresh and meets 0 first.
        let pairing = choose_engines(&engines(&["+1", "-0", ""]));
        assert_eq!(pairing, Some((0, 2)));

        // 1 and 2 tie on games; 1 has not met 2 yet.
        let pairing = choose_engines(&engines(&["+1 =2", "-0", "=0"]));
        assert_eq!(pairing, Some((1, 2)));
    }

    #[test]
    fn test_record_result() {
        let mut log = String::new();
        record_result(&mut log, ResultToken { outcome: Outcome::Win, opponent: 1 });
        assert_eq!(log, "+1");
        record_result(&mut log, ResultToken { outcome: Outcome::Draw, opponent: 1 });
        assert_eq!(log, "+1 =1");

        let mut padded = "-0 ".to_string();
        record_result(&mut padded, ResultToken { outcome: Outcome::Loss, opponent: 0 });
        assert_eq!(padded, "-0 -0");
    }

    #[test]
    fn test_tally() {
        let tally = Tally::from_results("+1 +2 =1 -2");
        assert_eq!(tally, Tally { wins: 2, draws: 1, losses: 1 });
        assert_eq!(tally.games(), 4);
        assert_eq!(tally.score(), 2.5);
        assert_eq!(tally.to_string(), "WDL: 2-1-1");
    }

    #[test]
    fn test_standings_use_display_names() {
        let mut list = engines(&["+1", "-0"]);
        list[1].name = Some("Beta".to_string());
        let table = standings(&list);
        assert_eq!(table[0].name, "e0");
        assert_eq!(table[1].name, "Beta");
        assert_eq!(table[1].tally.losses, 1);
    }

    proptest! {
        #[test]
        fn prop_pairing_is_two_distinct_engines(
            logs in prop::collection::vec(
                prop::collection::vec((0usize..3, 0usize..5), 0..12),
                2..5,
            )
        ) {
            let list: Vec<EngineConfig> = logs
                .iter()
                .enumerate()
                .map(|(i, log)| {
                    let mut engine = EngineConfig::new(format!("e{}", i));
                    for &(outcome, opponent) in log {
                        let outcome = [Outcome::Win, Outcome::Draw, Outcome::Loss][outcome];
                        record_result(&mut engine.results, ResultToken { outcome, opponent });
                    }
                    engine
                })
                .collect();

            let (white, black) = choose_engines(&list).unwrap();
            prop_assert_ne!(white, black);
            prop_assert!(white < list.len() && black < list.len());
            prop_assert_eq!(choose_engines(&list), Some((white, black)));
        }
    }
}
