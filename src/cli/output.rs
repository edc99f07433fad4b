//! Output formatting for CLI commands

use serde::Serialize;

use crate::team::Team;

/// Format output as JSON
pub fn format_output<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// One line per team, in sign-up order
pub fn format_team_line(team: &Team, max_teams: usize) -> String {
    let members = team
        .members
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let waitlist = if team.sign_up_position >= max_teams {
        " | waitlist"
    } else {
        ""
    };
    format!(
        "  #{} {} | id: {} | leader: {} | members: [{}] | invites: {}{}",
        team.sign_up_position + 1,
        team.name,
        team.id,
        team.leader,
        members,
        team.invites.len(),
        waitlist
    )
}
