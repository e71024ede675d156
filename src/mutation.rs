//! Pure state transitions applied by the scoring UI.
//!
//! A mutation never performs I/O and is total over every reachable [`QuizState`]: indices that
//! fall outside the current roster leave the state unchanged. Publishing the result is the
//! synchronizer's job.

use thiserror::Error;

use crate::model::{Cell, CustomTheme, PointValue, QuizState, Round, ScoreMatrix};

/// Largest roster the Primary may configure.
pub const MAX_TEAMS: u32 = 20;
/// Run value inserted by [`Mutation::AddPointValue`] when the UI does not pick one.
pub const DEFAULT_NEW_POINT_VALUE: i32 = 5;

/// Anything able to compute the next state from the current one.
pub trait Mutator: Send + Sync {
    /// Compute the next state. Must not perform I/O.
    fn apply(&self, state: &QuizState) -> QuizState;
}

impl<F> Mutator for F
where
    F: Fn(&QuizState) -> QuizState + Send + Sync,
{
    fn apply(&self, state: &QuizState) -> QuizState {
        self(state)
    }
}

/// Rejections raised while building a mutation from user input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    /// Roster size outside `1..=MAX_TEAMS`.
    #[error("number of teams must be between 1 and {MAX_TEAMS} (got {0})")]
    TeamCountOutOfRange(u32),
    /// Blank round label.
    #[error("round name must not be empty")]
    EmptyRoundName,
}

/// Partial update of the session settings. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    /// New scoreboard title.
    pub quiz_title: Option<String>,
    /// New Monitor theme name.
    pub theme: Option<String>,
    /// Toggle the compact Monitor layout.
    pub compact: Option<bool>,
    /// Applying a custom theme also switches the theme to `custom` unless `theme` is set.
    pub custom_theme: Option<CustomTheme>,
    /// Toggle the Monitor logo.
    pub show_logo: Option<bool>,
}

/// State transitions offered to the Primary (and the heartbeat written by Monitors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Configure the roster, clearing the over in progress but keeping archived rounds.
    SetNumTeams(u32),
    /// Record a score at `cell` and move the active cell to the next team.
    RecordScore {
        /// Where the score goes.
        cell: Cell,
        /// Button pressed.
        value: PointValue,
    },
    /// Move on to the next ball, starting again from the first team.
    AdvanceActiveCell,
    /// Archive the over in progress under `name`.
    EndRound(String),
    /// Apply a partial settings update.
    UpdateSetting(SettingsPatch),
    /// Give `team` a display name.
    RenameTeam {
        /// Team index.
        team: u32,
        /// New display name.
        name: String,
    },
    /// Flag `team` as out (or back in).
    SetTeamOut {
        /// Team index.
        team: u32,
        /// Whether the team is out.
        out: bool,
    },
    /// Insert a run value just before the wicket button.
    AddPointValue(i32),
    /// Replace the `index`-th numeric point value.
    SetPointValue {
        /// Position among the numeric buttons.
        index: usize,
        /// New run value.
        value: i32,
    },
    /// Remove the `index`-th numeric point value.
    RemovePointValue(usize),
    /// Start over from the initial state, keeping the session code.
    Reset,
    /// Monitor liveness stamp, in epoch milliseconds.
    Heartbeat(i64),
}

impl Mutation {
    /// Validated constructor for [`Mutation::SetNumTeams`].
    pub fn set_num_teams(count: u32) -> Result<Self, MutationError> {
        if (1..=MAX_TEAMS).contains(&count) {
            Ok(Self::SetNumTeams(count))
        } else {
            Err(MutationError::TeamCountOutOfRange(count))
        }
    }

    /// Record `value` at `cell`.
    pub fn record_score(cell: Cell, value: PointValue) -> Self {
        Self::RecordScore { cell, value }
    }

    /// Move to the next ball.
    pub fn advance_active_cell() -> Self {
        Self::AdvanceActiveCell
    }

    /// Validated constructor for [`Mutation::EndRound`].
    pub fn end_round(name: impl Into<String>) -> Result<Self, MutationError> {
        let name = name.into();
        if name.trim().is_empty() {
            Err(MutationError::EmptyRoundName)
        } else {
            Ok(Self::EndRound(name))
        }
    }

    /// Apply a settings patch.
    pub fn update_setting(patch: SettingsPatch) -> Self {
        Self::UpdateSetting(patch)
    }
}

impl Mutator for Mutation {
    fn apply(&self, state: &QuizState) -> QuizState {
        let mut next = state.clone();
        match self {
            Mutation::SetNumTeams(count) => {
                let count = (*count).min(MAX_TEAMS);
                next.num_teams = count;
                next.team_names = (1..=count).map(|i| format!("Team {i}")).collect();
                next.teams_out = vec![false; count as usize];
                next.scores = ScoreMatrix::new();
                next.num_questions = 0;
                next.active_cell = Some(Cell::default());
            }
            Mutation::RecordScore { cell, value } => {
                if cell.team >= next.num_teams {
                    return next;
                }
                let following = if cell.team + 1 >= next.num_teams {
                    match cell.question.checked_add(1) {
                        Some(question) => Cell::new(question, 0),
                        None => return next,
                    }
                } else {
                    Cell::new(cell.question, cell.team + 1)
                };
                next.scores
                    .entry(cell.question)
                    .or_default()
                    .insert(cell.team, value.to_score());
                next.num_questions = next.num_questions.max(following.question);
                next.active_cell = Some(following);
            }
            Mutation::AdvanceActiveCell => {
                let Some(active) = next.active_cell else {
                    return next;
                };
                let Some(question) = active.question.checked_add(1) else {
                    return next;
                };
                next.scores.entry(active.question).or_default();
                next.num_questions = next.num_questions.max(question);
                next.active_cell = Some(Cell::new(question, 0));
            }
            Mutation::EndRound(name) => {
                let scores = std::mem::take(&mut next.scores);
                next.rounds.push(Round {
                    name: name.clone(),
                    scores,
                });
                next.active_cell = Some(Cell::default());
                next.num_questions = 0;
            }
            Mutation::UpdateSetting(patch) => apply_settings(&mut next, patch),
            Mutation::RenameTeam { team, name } => {
                if let Some(slot) = next.team_names.get_mut(*team as usize) {
                    *slot = name.clone();
                }
            }
            Mutation::SetTeamOut { team, out } => {
                if *team < next.num_teams {
                    let index = *team as usize;
                    if next.teams_out.len() <= index {
                        next.teams_out.resize(index + 1, false);
                    }
                    next.teams_out[index] = *out;
                }
            }
            Mutation::AddPointValue(value) => {
                let at = next
                    .point_values
                    .iter()
                    .position(|v| *v == PointValue::WICKET)
                    .unwrap_or(next.point_values.len());
                next.point_values.insert(at, PointValue::Runs(*value));
            }
            Mutation::SetPointValue { index, value } => {
                if let Some(position) = numeric_position(&next.point_values, *index) {
                    next.point_values[position] = PointValue::Runs(*value);
                }
            }
            Mutation::RemovePointValue(index) => {
                if let Some(position) = numeric_position(&next.point_values, *index) {
                    next.point_values.remove(position);
                }
            }
            Mutation::Reset => {
                let heartbeat = next.heartbeat;
                next = QuizState::new(next.id);
                next.heartbeat = heartbeat;
            }
            Mutation::Heartbeat(at_ms) => next.heartbeat = Some(*at_ms),
        }
        next
    }
}

fn apply_settings(state: &mut QuizState, patch: &SettingsPatch) {
    if let Some(title) = &patch.quiz_title {
        state.quiz_title = title.clone();
    }
    if let Some(custom) = &patch.custom_theme {
        state.monitor_settings.custom_theme = Some(custom.clone());
        state.monitor_settings.theme = "custom".into();
    }
    if let Some(theme) = &patch.theme {
        state.monitor_settings.theme = theme.clone();
    }
    if let Some(compact) = patch.compact {
        state.monitor_settings.compact = compact;
    }
    if let Some(show_logo) = patch.show_logo {
        state.monitor_settings.show_logo = show_logo;
    }
}

/// Position in `values` of the `index`-th numeric entry.
fn numeric_position(values: &[PointValue], index: usize) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| matches!(value, PointValue::Runs(_)))
        .nth(index)
        .map(|(position, _)| position)
}
