//! Session state document shared between the Primary and every Monitor.
//!
//! The whole document is the unit of synchronization: clients always exchange a complete
//! [`QuizState`], never a diff.

pub mod schema;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Schema version written by this crate. Older documents are migrated by [`schema::decode`].
pub const SCHEMA_VERSION: u32 = 2;
/// Default title given to new sessions.
pub const DEFAULT_TITLE: &str = "Live Cricket Scoreboard";
/// Number of wickets after which a team is considered all out.
pub const WICKETS_ALL_OUT: u32 = 10;

/// Ball index -> team index -> score.
pub type ScoreMatrix = BTreeMap<u32, BTreeMap<u32, Score>>;

/// Score recorded for one team on one ball.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    /// Runs scored on the ball.
    #[serde(default)]
    pub runs: i32,
    /// The ball cost the team a wicket.
    #[serde(default)]
    pub is_wicket: bool,
}

/// Coordinates of a cell of the scoring grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Ball (question) index within the current over.
    pub question: u32,
    /// Team index.
    pub team: u32,
}

impl Cell {
    /// Build a cell from its coordinates.
    pub const fn new(question: u32, team: u32) -> Self {
        Self { question, team }
    }
}

/// A completed over archived by the Primary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Label given when the over was closed.
    pub name: String,
    /// Scores of the archived over.
    #[serde(default)]
    pub scores: ScoreMatrix,
}

/// Marker serialized as the literal `"WICKET"` inside `pointValues`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WicketTag {
    /// The only value, spelled `WICKET`.
    #[serde(rename = "WICKET")]
    Wicket,
}

/// One of the buttons offered to the scorer: a run value or a wicket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    /// Run value.
    Runs(i32),
    /// Wicket button.
    Wicket(WicketTag),
}

impl PointValue {
    /// The wicket button.
    pub const WICKET: PointValue = PointValue::Wicket(WicketTag::Wicket);

    /// Score recorded when this button is pressed.
    pub fn to_score(self) -> Score {
        match self {
            PointValue::Runs(runs) => Score {
                runs,
                is_wicket: false,
            },
            PointValue::Wicket(_) => Score {
                runs: 0,
                is_wicket: true,
            },
        }
    }
}

/// Custom colors (HSL triplets as strings) applied to the Monitor view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTheme {
    /// Page background.
    pub background: String,
    /// Score card background.
    pub card: String,
    /// Accent color.
    pub primary: String,
}

impl Default for CustomTheme {
    fn default() -> Self {
        Self {
            background: "234 67% 94%".into(),
            card: "234 67% 99%".into(),
            primary: "231 48% 48%".into(),
        }
    }
}

/// Display settings consumed by Monitor views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    /// Theme name; `custom` uses `custom_theme`.
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Dense layout for small screens.
    #[serde(default)]
    pub compact: bool,
    /// Colors used by the `custom` theme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_theme: Option<CustomTheme>,
    /// Show the branding logo.
    #[serde(default = "default_true")]
    pub show_logo: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            compact: false,
            custom_theme: Some(CustomTheme::default()),
            show_logo: true,
        }
    }
}

/// The complete, atomically replaceable state of one session.
///
/// Every field except `heartbeat` belongs to the Primary. Monitors only ever write
/// `heartbeat`; nothing in the storage layer enforces that split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizState {
    /// Session code, equal to the key the document is stored under.
    pub id: SessionId,
    /// Document layout version, see [`schema`].
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    /// Title shown above the scoreboard.
    #[serde(default = "default_title")]
    pub quiz_title: String,
    /// Size of the roster.
    #[serde(default)]
    pub num_teams: u32,
    /// Display names, indexed by team.
    #[serde(default)]
    pub team_names: Vec<String>,
    /// Scores of the over in progress.
    #[serde(default)]
    pub scores: ScoreMatrix,
    /// Cell the next score goes to.
    #[serde(default)]
    pub active_cell: Option<Cell>,
    /// Balls recorded so far in the current over.
    #[serde(default)]
    pub num_questions: u32,
    /// Archived overs, oldest first.
    #[serde(default)]
    pub rounds: Vec<Round>,
    /// Buttons offered to the scorer.
    #[serde(default = "default_point_values")]
    pub point_values: Vec<PointValue>,
    /// Teams the Primary marked as out, indexed by team.
    #[serde(default)]
    pub teams_out: Vec<bool>,
    /// Display settings for Monitors.
    #[serde(default)]
    pub monitor_settings: MonitorSettings,
    /// Epoch milliseconds of the latest Monitor heartbeat.
    #[serde(default, alias = "monitorHeartbeat", skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<i64>,
}

/// Aggregated runs and wickets for one team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeamTotal {
    /// Runs over every ball.
    pub runs: i64,
    /// Wickets over every ball.
    pub wickets: u32,
}

impl QuizState {
    /// Initial state of a freshly created session.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            schema_version: SCHEMA_VERSION,
            quiz_title: default_title(),
            num_teams: 0,
            team_names: Vec::new(),
            scores: ScoreMatrix::new(),
            active_cell: Some(Cell::default()),
            num_questions: 0,
            rounds: Vec::new(),
            point_values: default_point_values(),
            teams_out: Vec::new(),
            monitor_settings: MonitorSettings::default(),
            heartbeat: None,
        }
    }

    /// Display name of a team, falling back to `Team <n>` when unnamed.
    pub fn team_name(&self, team: u32) -> String {
        self.team_names
            .get(team as usize)
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("Team {}", u64::from(team) + 1))
    }

    /// Totals per team over every archived round plus the over in progress.
    pub fn team_totals(&self) -> Vec<TeamTotal> {
        let mut totals = vec![TeamTotal::default(); self.num_teams as usize];
        let matrices = self
            .rounds
            .iter()
            .map(|round| &round.scores)
            .chain(std::iter::once(&self.scores));

        for matrix in matrices {
            for row in matrix.values() {
                for (team, score) in row {
                    if let Some(total) = totals.get_mut(*team as usize) {
                        total.runs += i64::from(score.runs);
                        if score.is_wicket {
                            total.wickets += 1;
                        }
                    }
                }
            }
        }

        totals
    }

    /// Wickets lost by `team` across the whole session.
    pub fn total_wickets(&self, team: u32) -> u32 {
        self.team_totals()
            .get(team as usize)
            .map(|total| total.wickets)
            .unwrap_or(0)
    }

    /// Whether `team` has been marked out or has lost all its wickets.
    pub fn is_team_out(&self, team: u32) -> bool {
        self.teams_out.get(team as usize).copied().unwrap_or(false)
            || self.total_wickets(team) >= WICKETS_ALL_OUT
    }

    /// Numeric point values in display order, skipping the wicket button.
    pub fn numeric_point_values(&self) -> Vec<i32> {
        self.point_values
            .iter()
            .filter_map(|value| match value {
                PointValue::Runs(runs) => Some(*runs),
                PointValue::Wicket(_) => None,
            })
            .collect()
    }
}

fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_theme() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_point_values() -> Vec<PointValue> {
    vec![
        PointValue::Runs(0),
        PointValue::Runs(1),
        PointValue::Runs(2),
        PointValue::Runs(3),
        PointValue::Runs(4),
        PointValue::Runs(6),
        PointValue::WICKET,
    ]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn session() -> SessionId {
        SessionId::validate("482913").unwrap()
    }

    #[test]
    fn initial_state_matches_product_defaults() {
        let state = QuizState::new(session());
        assert_eq!(state.num_teams, 0);
        assert_eq!(state.quiz_title, DEFAULT_TITLE);
        assert_eq!(state.active_cell, Some(Cell::new(0, 0)));
        assert_eq!(state.numeric_point_values(), vec![0, 1, 2, 3, 4, 6]);
        assert_eq!(state.point_values.last(), Some(&PointValue::WICKET));
        assert!(state.heartbeat.is_none());
    }

    #[test]
    fn serializes_camel_case_with_wicket_literal() {
        let state = QuizState::new(session());
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["id"], "482913");
        assert_eq!(value["numTeams"], 0);
        assert_eq!(value["pointValues"][6], "WICKET");
        assert_eq!(value["monitorSettings"]["showLogo"], true);
        assert!(value.get("heartbeat").is_none());
    }

    #[test]
    fn missing_optional_fields_default_to_empty() {
        let state: QuizState = serde_json::from_value(json!({
            "id": "482913",
            "numTeams": 2,
            "monitorHeartbeat": 1_700_000_000_000_i64,
        }))
        .unwrap();

        assert!(state.rounds.is_empty());
        assert!(state.teams_out.is_empty());
        assert!(state.scores.is_empty());
        assert_eq!(state.heartbeat, Some(1_700_000_000_000));
        assert_eq!(state.team_name(1), "Team 2");
        assert_eq!(state.team_totals(), vec![TeamTotal::default(); 2]);
    }

    #[test]
    fn totals_span_rounds_and_current_over() {
        let mut state = QuizState::new(session());
        state.num_teams = 2;
        let mut archived = ScoreMatrix::new();
        archived.entry(0).or_default().insert(0, Score { runs: 4, is_wicket: false });
        archived.entry(0).or_default().insert(1, PointValue::WICKET.to_score());
        state.rounds.push(Round {
            name: "Over 1".into(),
            scores: archived,
        });
        state.scores.entry(0).or_default().insert(0, Score { runs: 6, is_wicket: false });
        // Scores for teams beyond `num_teams` are ignored by the views.
        state.scores.entry(0).or_default().insert(5, Score { runs: 1, is_wicket: false });

        let totals = state.team_totals();
        assert_eq!(totals[0], TeamTotal { runs: 10, wickets: 0 });
        assert_eq!(totals[1], TeamTotal { runs: 0, wickets: 1 });
        assert_eq!(state.total_wickets(1), 1);
        assert!(!state.is_team_out(1));
    }

    #[test]
    fn team_is_out_when_flagged_or_all_wickets_lost() {
        let mut state = QuizState::new(session());
        state.num_teams = 2;
        state.teams_out = vec![true, false];
        for ball in 0..WICKETS_ALL_OUT {
            state.scores.entry(ball).or_default().insert(1, PointValue::WICKET.to_score());
        }
        assert!(state.is_team_out(0));
        assert!(state.is_team_out(1));
    }
}
