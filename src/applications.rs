//! Moderator decisions on clan applications: role swaps, the roster entry
//! for accepted members, and the texts posted about them.

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config::ApplicationRoles;
use crate::error::{CollaboratorError, ValidationError};
use crate::executor::{RoleDirectory, RoleOutcome};
use crate::roster::{
    find_by_external_id, find_member, CellUpdate, CellValue, NewRosterEntry, RosterStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptedRank {
    Unholy,
    Friend,
}

impl AcceptedRank {
    pub fn from_choice(choice: &str) -> Result<Self, ValidationError> {
        match choice.trim().to_lowercase().as_str() {
            "unholy" => Ok(AcceptedRank::Unholy),
            "friend" => Ok(AcceptedRank::Friend),
            other => Err(ValidationError::InvalidApplicationRank(other.to_string())),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AcceptedRank::Unholy => "Unholy",
            AcceptedRank::Friend => "Friend",
        }
    }

    /// Rank text written to the roster. Friends are listed as Goblin, which
    /// sits outside the promotion ladder.
    pub fn roster_rank(self) -> &'static str {
        match self {
            AcceptedRank::Unholy => "Unholy",
            AcceptedRank::Friend => "Goblin",
        }
    }

    fn role(self, roles: &ApplicationRoles) -> u64 {
        match self {
            AcceptedRank::Unholy => roles.unholy,
            AcceptedRank::Friend => roles.friend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationDecision {
    Accept {
        user_id: u64,
        in_game_name: String,
        rank: AcceptedRank,
    },
    Deny {
        user_id: u64,
        reason: String,
    },
}

impl ApplicationDecision {
    pub fn user_id(&self) -> u64 {
        match self {
            ApplicationDecision::Accept { user_id, .. } | ApplicationDecision::Deny { user_id, .. } => {
                *user_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEntryOutcome {
    /// New row at the bottom of the roster.
    Appended,
    /// The name was already listed without a Discord id; the id was filled in.
    Linked { row: u32 },
    /// The Discord id already has a row. Left for moderators to review.
    AlreadyListed { row: u32, name: String },
    /// The name is listed under a different Discord id.
    NameTaken { row: u32, external_id: u64 },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationOutcome {
    pub decision: ApplicationDecision,
    pub roles: RoleOutcome,
    /// `None` for denials and for applicants who left the guild.
    pub roster: Option<RosterEntryOutcome>,
}

impl ApplicationOutcome {
    fn in_guild(&self) -> bool {
        !matches!(&self.roles, RoleOutcome::Skipped(why) if why == "not in guild")
    }

    /// Reply to the moderator who made the decision.
    pub fn reply(&self, moderator_id: u64) -> String {
        let mut lines = Vec::new();
        match &self.decision {
            ApplicationDecision::Accept { user_id, in_game_name, rank } => {
                if !self.in_guild() {
                    return format!("❌ <@{user_id}> was not found in the server.");
                }
                lines.push("✅ **Application Accepted**".to_string());
                lines.push(format!("Application accepted by <@{moderator_id}>"));
                lines.push(format!("**Applicant:** <@{user_id}>"));
                lines.push(format!("**Rank:** {}", rank.label()));
                lines.push(format!("**In Game Name:** {in_game_name}"));
            }
            ApplicationDecision::Deny { user_id, reason } => {
                lines.push("❌ **Application Denied**".to_string());
                lines.push(format!("Application denied by <@{moderator_id}>"));
                lines.push(format!("**Applicant:** <@{user_id}>"));
                lines.push(format!("**Reason:** {reason}"));
                if !self.in_guild() {
                    lines.push("⚠️ Applicant is no longer in the server, roles were not changed.".to_string());
                }
            }
        }

        if let RoleOutcome::Failed(why) = &self.roles {
            lines.push(format!("⚠️ Roles could not be updated: {why}"));
        }
        match &self.roster {
            Some(RosterEntryOutcome::Appended) => lines.push("📋 Added to the roster.".to_string()),
            Some(RosterEntryOutcome::Linked { row }) => {
                lines.push(format!("📋 Linked Discord ID to roster row {row}."))
            }
            Some(RosterEntryOutcome::AlreadyListed { row, .. }) => {
                lines.push(format!("⚠️ Discord ID already on roster row {row}, sent for mod review."))
            }
            Some(RosterEntryOutcome::NameTaken { row, .. }) => {
                lines.push(format!("⚠️ Name already on roster row {row} under another Discord ID, sent for mod review."))
            }
            Some(RosterEntryOutcome::Failed(why)) => {
                lines.push(format!("⚠️ Roster was not updated: {why}"))
            }
            None => {}
        }
        lines.join("\n")
    }

    /// Welcome post for the accepted-applications channel.
    pub fn announcement(&self) -> Option<String> {
        match &self.decision {
            ApplicationDecision::Accept { user_id, in_game_name, rank } if self.in_guild() => {
                Some(format!(
                    "✅ **Application Accepted**\nWelcome to the clan, <@{user_id}>!\n**Rank:** {}\n**Discord ID:** {user_id}\n**In Game Name:** {in_game_name}",
                    rank.label()
                ))
            }
            _ => None,
        }
    }

    /// Post for the mod review channel when the roster already has a
    /// conflicting row.
    pub fn duplicate_review(&self) -> Option<String> {
        let ApplicationDecision::Accept { user_id, in_game_name, rank } = &self.decision else {
            return None;
        };
        let existing = match self.roster.as_ref()? {
            RosterEntryOutcome::AlreadyListed { row, name } => {
                format!("User <@{user_id}> already exists in the roster as **{name}** (row {row}).")
            }
            RosterEntryOutcome::NameTaken { row, external_id } => format!(
                "**{in_game_name}** is already on roster row {row} with Discord ID {external_id}."
            ),
            _ => return None,
        };
        Some(format!(
            "⚠️ **Duplicate Discord ID Found**\n{existing}\n**New Application:** {in_game_name} ({})\n**Discord ID:** {user_id}",
            rank.label()
        ))
    }

    /// Direct message for a denied applicant still in the guild.
    pub fn denial_notice(&self) -> Option<String> {
        match &self.decision {
            ApplicationDecision::Deny { reason, .. } if self.in_guild() => Some(format!(
                "❌ **Application Denied**\nSorry, your application has been denied for this reason: {reason}"
            )),
            _ => None,
        }
    }
}

/// Applies moderator decisions through the role and roster collaborators.
pub struct ApplicationDesk<'a> {
    roster: &'a dyn RosterStore,
    roles: &'a dyn RoleDirectory,
    role_ids: &'a ApplicationRoles,
}

impl<'a> ApplicationDesk<'a> {
    pub fn new(
        roster: &'a dyn RosterStore,
        roles: &'a dyn RoleDirectory,
        role_ids: &'a ApplicationRoles,
    ) -> Self {
        Self { roster, roles, role_ids }
    }

    pub async fn process(&self, decision: ApplicationDecision, today: NaiveDate) -> ApplicationOutcome {
        match &decision {
            ApplicationDecision::Accept { user_id, in_game_name, rank } => {
                let roles = self.swap_roles(*user_id, rank.role(self.role_ids)).await;
                let roster = match &roles {
                    RoleOutcome::Skipped(_) => None,
                    _ => Some(self.record(*user_id, in_game_name, *rank, today).await),
                };
                info!("Application from {} accepted as {}", user_id, rank.label());
                ApplicationOutcome { decision, roles, roster }
            }
            ApplicationDecision::Deny { user_id, .. } => {
                let roles = self.swap_roles(*user_id, self.role_ids.denied).await;
                info!("Application from {} denied", user_id);
                ApplicationOutcome { decision, roles, roster: None }
            }
        }
    }

    async fn swap_roles(&self, user_id: u64, target: u64) -> RoleOutcome {
        match self.try_swap_roles(user_id, target).await {
            Ok(outcome) => outcome,
            Err(why) => {
                error!("Failed to update application roles for {}: {}", user_id, why);
                RoleOutcome::Failed(why.to_string())
            }
        }
    }

    async fn try_swap_roles(&self, user_id: u64, target: u64) -> Result<RoleOutcome, CollaboratorError> {
        let Some(held) = self.roles.member_roles(user_id).await? else {
            warn!("Applicant {} is not in the guild", user_id);
            return Ok(RoleOutcome::Skipped("not in guild".to_string()));
        };

        let pending = self.role_ids.pending;
        if pending != 0 && held.contains(&pending) {
            self.roles.remove_role(user_id, pending).await?;
        }
        if target == 0 {
            warn!("No role configured for this application decision");
        } else if !held.contains(&target) {
            self.roles.add_role(user_id, target).await?;
        }
        Ok(RoleOutcome::Applied)
    }

    async fn record(
        &self,
        user_id: u64,
        name: &str,
        rank: AcceptedRank,
        today: NaiveDate,
    ) -> RosterEntryOutcome {
        match self.try_record(user_id, name, rank, today).await {
            Ok(outcome) => outcome,
            Err(why) => {
                error!("Failed to add {} to the roster: {}", name, why);
                RosterEntryOutcome::Failed(why.to_string())
            }
        }
    }

    async fn try_record(
        &self,
        user_id: u64,
        name: &str,
        rank: AcceptedRank,
        today: NaiveDate,
    ) -> Result<RosterEntryOutcome, CollaboratorError> {
        let members = self.roster.read_members().await?;
        if let Some(existing) = find_by_external_id(&members, user_id) {
            warn!("Discord ID {} already on roster row {}", user_id, existing.row);
            return Ok(RosterEntryOutcome::AlreadyListed {
                row: existing.row,
                name: existing.name.clone(),
            });
        }

        match find_member(&members, name) {
            Some(existing) => match existing.external_id {
                None => {
                    self.roster
                        .write_cell(CellUpdate {
                            column: self.roster.columns().external_id.clone(),
                            row: existing.row,
                            value: CellValue::Text(user_id.to_string()),
                        })
                        .await?;
                    info!("Linked Discord ID {} to roster row {}", user_id, existing.row);
                    Ok(RosterEntryOutcome::Linked { row: existing.row })
                }
                Some(other) => Ok(RosterEntryOutcome::NameTaken {
                    row: existing.row,
                    external_id: other,
                }),
            },
            None => {
                self.roster
                    .append_member(NewRosterEntry {
                        name: name.trim().to_string(),
                        external_id: user_id,
                        rank: rank.roster_rank().to_string(),
                        enrolled_at: today.format("%Y-%m-%d").to_string(),
                    })
                    .await?;
                info!("Added {} to the roster", name.trim());
                Ok(RosterEntryOutcome::Appended)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promotion::RosterMember;
    use crate::ranks::Rank;
    use crate::roster::RosterColumns;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRoster {
        columns: RosterColumns,
        members: Vec<RosterMember>,
        fail_appends: bool,
        cells: Mutex<Vec<CellUpdate>>,
        appended: Mutex<Vec<NewRosterEntry>>,
    }

    #[async_trait]
    impl RosterStore for MemoryRoster {
        fn columns(&self) -> &RosterColumns {
            &self.columns
        }

        async fn read_members(&self) -> Result<Vec<RosterMember>, CollaboratorError> {
            Ok(self.members.clone())
        }

        async fn write_cell(&self, update: CellUpdate) -> Result<(), CollaboratorError> {
            self.cells.lock().unwrap().push(update);
            Ok(())
        }

        async fn batch_update(&self, updates: Vec<CellUpdate>) -> Result<(), CollaboratorError> {
            self.cells.lock().unwrap().extend(updates);
            Ok(())
        }

        async fn append_member(&self, entry: NewRosterEntry) -> Result<(), CollaboratorError> {
            if self.fail_appends {
                return Err(CollaboratorError::Status {
                    service: "Google Sheets",
                    status: 503,
                    body: "backend error".into(),
                });
            }
            self.appended.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryRoles {
        held: Mutex<HashMap<u64, Vec<u64>>>,
    }

    impl MemoryRoles {
        fn with_member(user_id: u64, roles: &[u64]) -> Self {
            let directory = MemoryRoles::default();
            directory.held.lock().unwrap().insert(user_id, roles.to_vec());
            directory
        }

        fn roles_of(&self, user_id: u64) -> Vec<u64> {
            self.held.lock().unwrap().get(&user_id).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl RoleDirectory for MemoryRoles {
        async fn member_roles(&self, user_id: u64) -> Result<Option<Vec<u64>>, CollaboratorError> {
            Ok(self.held.lock().unwrap().get(&user_id).cloned())
        }

        async fn add_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError> {
            self.held.lock().unwrap().entry(user_id).or_default().push(role_id);
            Ok(())
        }

        async fn remove_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError> {
            if let Some(roles) = self.held.lock().unwrap().get_mut(&user_id) {
                roles.retain(|r| *r != role_id);
            }
            Ok(())
        }
    }

    const APPLICANT: u64 = 9001;

    fn role_ids() -> ApplicationRoles {
        ApplicationRoles { pending: 42, unholy: 400, friend: 41, denied: 43 }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 3).unwrap()
    }

    fn member(row: u32, name: &str, external_id: Option<u64>) -> RosterMember {
        RosterMember {
            row,
            name: name.into(),
            external_id,
            rank: Some(Rank::Sage),
            progress_counter: 2,
            enrolled_at: Some("2023-01-10".into()),
        }
    }

    fn accept(name: &str, rank: AcceptedRank) -> ApplicationDecision {
        ApplicationDecision::Accept { user_id: APPLICANT, in_game_name: name.into(), rank }
    }

    #[test]
    fn rank_choices() {
        assert_eq!(AcceptedRank::from_choice(" Unholy "), Ok(AcceptedRank::Unholy));
        assert_eq!(AcceptedRank::from_choice("friend"), Ok(AcceptedRank::Friend));
        assert_eq!(
            AcceptedRank::from_choice("Legend"),
            Err(ValidationError::InvalidApplicationRank("legend".into()))
        );
        assert_eq!(AcceptedRank::Friend.roster_rank(), "Goblin");
        assert!(AcceptedRank::Friend.roster_rank().parse::<Rank>().is_err());
    }

    #[tokio::test]
    async fn acceptance_swaps_pending_for_rank_role_and_appends() {
        let roster = MemoryRoster { members: vec![member(2, "Zezima", Some(1))], ..Default::default() };
        let roles = MemoryRoles::with_member(APPLICANT, &[7, 42]);
        let ids = role_ids();

        let outcome = ApplicationDesk::new(&roster, &roles, &ids)
            .process(accept("Lynx Titan", AcceptedRank::Unholy), today())
            .await;

        assert_eq!(outcome.roles, RoleOutcome::Applied);
        assert_eq!(outcome.roster, Some(RosterEntryOutcome::Appended));
        assert_eq!(roles.roles_of(APPLICANT), vec![7, 400]);
        assert_eq!(
            roster.appended.lock().unwrap().clone(),
            vec![NewRosterEntry {
                name: "Lynx Titan".into(),
                external_id: APPLICANT,
                rank: "Unholy".into(),
                enrolled_at: "2024-07-03".into(),
            }]
        );
        assert!(roster.cells.lock().unwrap().is_empty());

        let welcome = outcome.announcement().unwrap();
        assert!(welcome.contains("Welcome to the clan, <@9001>!"));
        assert!(welcome.contains("**In Game Name:** Lynx Titan"));
        assert!(outcome.duplicate_review().is_none());
        assert!(outcome.reply(5).contains("Application accepted by <@5>"));
    }

    #[tokio::test]
    async fn friends_are_listed_as_goblins() {
        let roster = MemoryRoster::default();
        let roles = MemoryRoles::with_member(APPLICANT, &[42]);
        let ids = role_ids();

        ApplicationDesk::new(&roster, &roles, &ids)
            .process(accept("Woox", AcceptedRank::Friend), today())
            .await;

        assert_eq!(roles.roles_of(APPLICANT), vec![41]);
        assert_eq!(roster.appended.lock().unwrap()[0].rank, "Goblin");
    }

    #[tokio::test]
    async fn listed_name_without_id_is_linked_in_place() {
        let roster = MemoryRoster {
            members: vec![member(5, "Lynx Titan", None)],
            ..Default::default()
        };
        let roles = MemoryRoles::with_member(APPLICANT, &[42]);
        let ids = role_ids();

        let outcome = ApplicationDesk::new(&roster, &roles, &ids)
            .process(accept("lynx titan", AcceptedRank::Unholy), today())
            .await;

        assert_eq!(outcome.roster, Some(RosterEntryOutcome::Linked { row: 5 }));
        assert!(roster.appended.lock().unwrap().is_empty());
        let cells = roster.cells.lock().unwrap().clone();
        assert_eq!(
            cells,
            vec![CellUpdate { column: "B".into(), row: 5, value: CellValue::Text("9001".into()) }]
        );
        assert_eq!(cells[0].a1(), "B5");
    }

    #[tokio::test]
    async fn known_discord_id_goes_to_review_instead_of_a_second_row() {
        let roster = MemoryRoster {
            members: vec![member(2, "Zezima", Some(1)), member(8, "Old Alt", Some(APPLICANT))],
            ..Default::default()
        };
        let roles = MemoryRoles::with_member(APPLICANT, &[42]);
        let ids = role_ids();

        let outcome = ApplicationDesk::new(&roster, &roles, &ids)
            .process(accept("New Main", AcceptedRank::Unholy), today())
            .await;

        assert_eq!(
            outcome.roster,
            Some(RosterEntryOutcome::AlreadyListed { row: 8, name: "Old Alt".into() })
        );
        assert!(roster.appended.lock().unwrap().is_empty());
        let review = outcome.duplicate_review().unwrap();
        assert!(review.starts_with("⚠️ **Duplicate Discord ID Found**"));
        assert!(review.contains("**Old Alt** (row 8)"));
        assert!(review.contains("New Main (Unholy)"));
    }

    #[tokio::test]
    async fn name_under_another_id_is_not_overwritten() {
        let roster = MemoryRoster {
            members: vec![member(3, "Lynx Titan", Some(77))],
            ..Default::default()
        };
        let roles = MemoryRoles::with_member(APPLICANT, &[]);
        let ids = role_ids();

        let outcome = ApplicationDesk::new(&roster, &roles, &ids)
            .process(accept("Lynx Titan", AcceptedRank::Unholy), today())
            .await;

        assert_eq!(
            outcome.roster,
            Some(RosterEntryOutcome::NameTaken { row: 3, external_id: 77 })
        );
        assert!(roster.cells.lock().unwrap().is_empty());
        assert!(outcome.duplicate_review().unwrap().contains("Discord ID 77"));
    }

    #[tokio::test]
    async fn absent_applicant_is_neither_roled_nor_listed() {
        let roster = MemoryRoster::default();
        let roles = MemoryRoles::default();
        let ids = role_ids();

        let outcome = ApplicationDesk::new(&roster, &roles, &ids)
            .process(accept("Ghost", AcceptedRank::Unholy), today())
            .await;

        assert_eq!(outcome.roles, RoleOutcome::Skipped("not in guild".into()));
        assert_eq!(outcome.roster, None);
        assert!(outcome.announcement().is_none());
        assert_eq!(outcome.reply(5), "❌ <@9001> was not found in the server.");
    }

    #[tokio::test]
    async fn roster_failure_keeps_the_acceptance() {
        let roster = MemoryRoster { fail_appends: true, ..Default::default() };
        let roles = MemoryRoles::with_member(APPLICANT, &[42]);
        let ids = role_ids();

        let outcome = ApplicationDesk::new(&roster, &roles, &ids)
            .process(accept("Lynx Titan", AcceptedRank::Unholy), today())
            .await;

        assert_eq!(outcome.roles, RoleOutcome::Applied);
        assert!(matches!(outcome.roster, Some(RosterEntryOutcome::Failed(_))));
        assert!(outcome.announcement().is_some());
        assert!(outcome.reply(5).contains("⚠️ Roster was not updated"));
    }

    #[tokio::test]
    async fn denial_swaps_pending_for_denied_role() {
        let roster = MemoryRoster::default();
        let roles = MemoryRoles::with_member(APPLICANT, &[42, 7]);
        let ids = role_ids();
        let decision = ApplicationDecision::Deny { user_id: APPLICANT, reason: "Total level too low".into() };

        let outcome = ApplicationDesk::new(&roster, &roles, &ids).process(decision, today()).await;

        assert_eq!(outcome.roles, RoleOutcome::Applied);
        assert_eq!(outcome.roster, None);
        assert_eq!(roles.roles_of(APPLICANT), vec![7, 43]);
        assert!(roster.appended.lock().unwrap().is_empty());
        assert_eq!(
            outcome.denial_notice().unwrap(),
            "❌ **Application Denied**\nSorry, your application has been denied for this reason: Total level too low"
        );
        assert!(outcome.reply(5).contains("**Reason:** Total level too low"));
    }

    #[tokio::test]
    async fn unconfigured_deny_role_only_clears_pending() {
        let roster = MemoryRoster::default();
        let roles = MemoryRoles::with_member(APPLICANT, &[42]);
        let ids = ApplicationRoles { denied: 0, ..role_ids() };
        let decision = ApplicationDecision::Deny { user_id: APPLICANT, reason: "spam".into() };

        let outcome = ApplicationDesk::new(&roster, &roles, &ids).process(decision, today()).await;

        assert_eq!(outcome.roles, RoleOutcome::Applied);
        assert!(roles.roles_of(APPLICANT).is_empty());
    }
}
