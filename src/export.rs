//! Tabular export of a finished session: one row per ball, two columns per team.

use crate::model::{QuizState, Score};

/// Render the archived rounds of `state` as CSV.
///
/// Each round yields one row per recorded ball, an `Over Total` row and a blank separator.
/// A final `Grand Total` row sums every round. The over in progress is not exported.
pub fn to_csv(state: &QuizState) -> String {
    let teams = state.team_names.len();
    let mut rows: Vec<Vec<String>> = Vec::new();

    let mut header = vec!["Over".to_string(), "Ball".to_string()];
    for name in &state.team_names {
        header.push(format!("{name} Runs"));
        header.push(format!("{name} Wickets"));
    }
    rows.push(header);

    let mut grand = vec![(0_i64, 0_u32); teams];

    for round in &state.rounds {
        let mut over = vec![(0_i64, 0_u32); teams];

        for (ball, row_scores) in &round.scores {
            let mut row = vec![round.name.clone(), format!("B{}", u64::from(*ball) + 1)];
            for (team, totals) in over.iter_mut().enumerate() {
                let score = row_scores.get(&(team as u32)).copied().unwrap_or_default();
                let Score { runs, is_wicket } = score;
                let wicket = u32::from(is_wicket);
                row.push(runs.to_string());
                row.push(wicket.to_string());
                totals.0 += i64::from(runs);
                totals.1 += wicket;
            }
            rows.push(row);
        }

        let mut total_row = vec![round.name.clone(), "Over Total".to_string()];
        for (team, (runs, wickets)) in over.iter().enumerate() {
            total_row.push(runs.to_string());
            total_row.push(wickets.to_string());
            grand[team].0 += runs;
            grand[team].1 += wickets;
        }
        rows.push(total_row);
        rows.push(Vec::new());
    }

    let mut grand_row = vec!["Overall".to_string(), "Grand Total".to_string()];
    for (runs, wickets) in grand {
        grand_row.push(runs.to_string());
        grand_row.push(wickets.to_string());
    }
    rows.push(grand_row);

    rows.iter()
        .map(|row| row.iter().map(|field| quote(field)).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Cell, PointValue},
        mutation::{Mutation, Mutator},
        session::SessionId,
    };

    #[test]
    fn exports_rounds_with_totals() {
        let mut state = QuizState::new(SessionId::validate("482913").unwrap());
        for mutation in [
            Mutation::set_num_teams(2).unwrap(),
            Mutation::record_score(Cell::new(0, 0), PointValue::Runs(4)),
            Mutation::record_score(Cell::new(0, 1), PointValue::WICKET),
            Mutation::record_score(Cell::new(1, 0), PointValue::Runs(6)),
            Mutation::end_round("Over 1").unwrap(),
            // Scores of the over in progress are not part of the export.
            Mutation::record_score(Cell::new(0, 0), PointValue::Runs(1)),
        ] {
            state = mutation.apply(&state);
        }

        let csv = to_csv(&state);
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(
            lines,
            vec![
                "Over,Ball,Team 1 Runs,Team 1 Wickets,Team 2 Runs,Team 2 Wickets",
                "Over 1,B1,4,0,0,1",
                "Over 1,B2,6,0,0,0",
                "Over 1,Over Total,10,0,0,1",
                "",
                "Overall,Grand Total,10,0,0,1",
            ]
        );
    }

    #[test]
    fn quotes_fields_with_separators() {
        let mut state = QuizState::new(SessionId::validate("482913").unwrap());
        state = Mutation::set_num_teams(1).unwrap().apply(&state);
        state = Mutation::RenameTeam {
            team: 0,
            name: "Lions, \"A\"".into(),
        }
        .apply(&state);

        let csv = to_csv(&state);
        assert!(csv.starts_with("Over,Ball,\"Lions, \"\"A\"\" Runs\",\"Lions, \"\"A\"\" Wickets\""));
        assert!(csv.ends_with("Overall,Grand Total,0,0"));
    }
}
