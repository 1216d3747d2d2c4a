//! Applies promotion decisions to the roster and to guild roles.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::RoleConfig;
use crate::error::CollaboratorError;
use crate::promotion::{PromotionDecision, RosterMember};
use crate::report::{promotion_announcement, split_message, DISCORD_MESSAGE_LIMIT};
use crate::roster::{find_member, CellUpdate, CellValue, RosterStore};

/// Role membership for guild members, addressed by Discord ids.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Role ids the member holds, or `None` when they are not in the guild.
    async fn member_roles(&self, user_id: u64) -> Result<Option<Vec<u64>>, CollaboratorError>;

    async fn add_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError>;

    async fn remove_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutcome {
    /// Roles now reflect the new rank.
    Applied,
    /// Nothing to do or nothing possible: no id, not in guild, no role mapping.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberOutcome {
    pub decision: PromotionDecision,
    pub roles: RoleOutcome,
}

#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Set when the batched roster write failed.
    pub roster_error: Option<String>,
    pub outcomes: Vec<MemberOutcome>,
    /// Announcement chunks, each within the message limit.
    pub notification: Vec<String>,
}

impl ExecutionReport {
    pub fn roster_updated(&self) -> bool {
        self.roster_error.is_none()
    }

    /// Promotions that took effect in at least one system.
    pub fn successful(&self) -> Vec<&PromotionDecision> {
        self.outcomes
            .iter()
            .filter(|o| self.roster_updated() || o.roles == RoleOutcome::Applied)
            .map(|o| &o.decision)
            .collect()
    }

    pub fn role_failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.roles, RoleOutcome::Failed(_)))
            .count()
    }
}

/// Rank and counter cells for every decision whose member is in the snapshot.
pub fn roster_updates(
    decisions: &[PromotionDecision],
    roster: &[RosterMember],
    store: &dyn RosterStore,
) -> Vec<CellUpdate> {
    let columns = store.columns();
    decisions
        .iter()
        .filter_map(|d| {
            let Some(member) = find_member(roster, &d.member_name) else {
                warn!("Member {} not found for batch update", d.member_name);
                return None;
            };
            Some([
                CellUpdate {
                    column: columns.rank.clone(),
                    row: member.row,
                    value: CellValue::Text(d.to_rank.to_string()),
                },
                CellUpdate {
                    column: columns.counter.clone(),
                    row: member.row,
                    value: CellValue::Number(u64::from(member.progress_counter) + 1),
                },
            ])
        })
        .flatten()
        .collect()
}

pub struct PromotionExecutor<'a> {
    store: &'a dyn RosterStore,
    roles: &'a dyn RoleDirectory,
    role_ids: &'a RoleConfig,
}

impl<'a> PromotionExecutor<'a> {
    pub fn new(
        store: &'a dyn RosterStore,
        roles: &'a dyn RoleDirectory,
        role_ids: &'a RoleConfig,
    ) -> Self {
        Self {
            store,
            roles,
            role_ids,
        }
    }

    /// Writes the roster in one batch, then updates each member's roles.
    /// A failure in one subsystem never stops the other.
    pub async fn execute(
        &self,
        decisions: &[PromotionDecision],
        roster: &[RosterMember],
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        if decisions.is_empty() {
            return report;
        }

        let updates = roster_updates(decisions, roster, self.store);
        if updates.is_empty() {
            report.roster_error = Some("no promoted member was found in the roster".to_string());
        } else if let Err(why) = self.store.batch_update(updates).await {
            error!("Failed to update roster with promotions: {}", why);
            report.roster_error = Some(why.to_string());
        }

        for decision in decisions {
            let roles = self.apply_roles(decision).await;
            report.outcomes.push(MemberOutcome {
                decision: decision.clone(),
                roles,
            });
        }

        let successful: Vec<PromotionDecision> =
            report.successful().into_iter().cloned().collect();
        report.notification = promotion_announcement(&successful)
            .map(|text| split_message(&text, DISCORD_MESSAGE_LIMIT))
            .unwrap_or_default();

        info!(
            promotions = decisions.len(),
            announced = successful.len(),
            role_failures = report.role_failures(),
            roster_updated = report.roster_updated(),
            "Executed promotions"
        );
        report
    }

    async fn apply_roles(&self, decision: &PromotionDecision) -> RoleOutcome {
        let name = &decision.member_name;
        let Some(user_id) = decision.external_id else {
            warn!("No Discord ID found for {}", name);
            return RoleOutcome::Skipped("no Discord id".to_string());
        };

        let old_role = self.role_ids.role_for(decision.from_rank);
        let new_role = self.role_ids.role_for(decision.to_rank);
        if old_role.is_none() && new_role.is_none() {
            warn!(
                "No roles found for promotion: {} ({} -> {})",
                name, decision.from_rank, decision.to_rank
            );
            return RoleOutcome::Skipped("no role mapping".to_string());
        }

        match self.swap_roles(user_id, old_role, new_role, decision).await {
            Ok(outcome) => outcome,
            Err(why) if why.is_forbidden() => {
                error!("No permission to update roles for {}: {}", name, why);
                RoleOutcome::Failed(why.to_string())
            }
            Err(why) => {
                error!("Failed to update Discord roles for {}: {}", name, why);
                RoleOutcome::Failed(why.to_string())
            }
        }
    }

    async fn swap_roles(
        &self,
        user_id: u64,
        old_role: Option<u64>,
        new_role: Option<u64>,
        decision: &PromotionDecision,
    ) -> Result<RoleOutcome, CollaboratorError> {
        let name = &decision.member_name;
        let Some(held) = self.roles.member_roles(user_id).await? else {
            warn!("Discord member not found: {} ({})", user_id, name);
            return Ok(RoleOutcome::Skipped("not in guild".to_string()));
        };

        match old_role {
            Some(role) if held.contains(&role) => {
                self.roles.remove_role(user_id, role).await?;
                info!("Removed {} role from {}", decision.from_rank, name);
            }
            Some(_) => {}
            None => warn!("No role configured for {}", decision.from_rank),
        }

        match new_role {
            Some(role) if !held.contains(&role) => {
                self.roles.add_role(user_id, role).await?;
                info!("Added {} role to {}", decision.to_rank, name);
            }
            Some(_) => {}
            None => warn!("No role configured for {}", decision.to_rank),
        }

        Ok(RoleOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranks::Rank;
    use crate::roster::{NewRosterEntry, RosterColumns};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRoster {
        columns: RosterColumns,
        fail: bool,
        writes: Mutex<Vec<CellUpdate>>,
    }

    #[async_trait]
    impl RosterStore for MemoryRoster {
        fn columns(&self) -> &RosterColumns {
            &self.columns
        }

        async fn read_members(&self) -> Result<Vec<RosterMember>, CollaboratorError> {
            Ok(Vec::new())
        }

        async fn write_cell(&self, update: CellUpdate) -> Result<(), CollaboratorError> {
            self.writes.lock().unwrap().push(update);
            Ok(())
        }

        async fn batch_update(&self, updates: Vec<CellUpdate>) -> Result<(), CollaboratorError> {
            if self.fail {
                return Err(CollaboratorError::Status {
                    service: "Google Sheets",
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.writes.lock().unwrap().extend(updates);
            Ok(())
        }

        async fn append_member(&self, _: NewRosterEntry) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryRoles {
        held: Mutex<HashMap<u64, Vec<u64>>>,
        forbidden: Vec<u64>,
    }

    #[async_trait]
    impl RoleDirectory for MemoryRoles {
        async fn member_roles(&self, user_id: u64) -> Result<Option<Vec<u64>>, CollaboratorError> {
            Ok(self.held.lock().unwrap().get(&user_id).cloned())
        }

        async fn add_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError> {
            if self.forbidden.contains(&user_id) {
                return Err(CollaboratorError::Forbidden("Missing Permissions".into()));
            }
            self.held.lock().unwrap().entry(user_id).or_default().push(role_id);
            Ok(())
        }

        async fn remove_role(&self, user_id: u64, role_id: u64) -> Result<(), CollaboratorError> {
            if self.forbidden.contains(&user_id) {
                return Err(CollaboratorError::Forbidden("Missing Permissions".into()));
            }
            if let Some(roles) = self.held.lock().unwrap().get_mut(&user_id) {
                roles.retain(|r| *r != role_id);
            }
            Ok(())
        }
    }

    fn role_ids() -> RoleConfig {
        RoleConfig {
            mediator: 10,
            sage: 20,
            destroyer: 30,
            unholy: 40,
            legend: 0,
        }
    }

    fn roster() -> Vec<RosterMember> {
        vec![
            RosterMember {
                row: 2,
                name: "Zezima".into(),
                external_id: Some(1),
                rank: Some(Rank::Sage),
                progress_counter: 10,
                enrolled_at: None,
            },
            RosterMember {
                row: 3,
                name: "Woox".into(),
                external_id: Some(2),
                rank: Some(Rank::Sage),
                progress_counter: 12,
                enrolled_at: None,
            },
        ]
    }

    fn decision(name: &str, id: u64) -> PromotionDecision {
        PromotionDecision {
            member_name: name.into(),
            from_rank: Rank::Sage,
            to_rank: Rank::Destroyer,
            external_id: Some(id),
        }
    }

    fn roles_with(held: &[(u64, Vec<u64>)]) -> MemoryRoles {
        MemoryRoles {
            held: Mutex::new(held.iter().cloned().collect()),
            forbidden: Vec::new(),
        }
    }

    #[tokio::test]
    async fn writes_rank_and_counter_then_swaps_roles() {
        let store = MemoryRoster::default();
        let roles = roles_with(&[(1, vec![20, 99])]);
        let ids = role_ids();
        let report = PromotionExecutor::new(&store, &roles, &ids)
            .execute(&[decision("zezima", 1)], &roster())
            .await;

        let writes = store.writes.lock().unwrap().clone();
        assert_eq!(
            writes,
            vec![
                CellUpdate { column: "C".into(), row: 2, value: CellValue::Text("Destroyer".into()) },
                CellUpdate { column: "D".into(), row: 2, value: CellValue::Number(11) },
            ]
        );
        assert_eq!(roles.held.lock().unwrap()[&1], vec![99, 30]);
        assert_eq!(report.outcomes[0].roles, RoleOutcome::Applied);
        assert_eq!(report.notification.len(), 1);
        assert!(report.notification[0].contains("<@1>"));
    }

    #[tokio::test]
    async fn roles_are_attempted_when_roster_batch_fails() {
        let store = MemoryRoster {
            fail: true,
            ..MemoryRoster::default()
        };
        let roles = roles_with(&[(1, vec![20])]);
        let ids = role_ids();
        let report = PromotionExecutor::new(&store, &roles, &ids)
            .execute(&[decision("Zezima", 1)], &roster())
            .await;

        assert!(!report.roster_updated());
        assert_eq!(roles.held.lock().unwrap()[&1], vec![30]);
        assert_eq!(report.successful().len(), 1);
    }

    #[tokio::test]
    async fn forbidden_member_does_not_stop_others() {
        let store = MemoryRoster::default();
        let mut roles = roles_with(&[(1, vec![20]), (2, vec![20])]);
        roles.forbidden = vec![1];
        let ids = role_ids();
        let report = PromotionExecutor::new(&store, &roles, &ids)
            .execute(&[decision("Zezima", 1), decision("Woox", 2)], &roster())
            .await;

        assert!(matches!(report.outcomes[0].roles, RoleOutcome::Failed(_)));
        assert_eq!(report.outcomes[1].roles, RoleOutcome::Applied);
        assert_eq!(roles.held.lock().unwrap()[&2], vec![30]);
        assert_eq!(report.role_failures(), 1);
    }

    #[tokio::test]
    async fn missing_mapping_and_absent_member_are_skipped() {
        let store = MemoryRoster::default();
        let roles = roles_with(&[]);
        let ids = RoleConfig::default();
        let report = PromotionExecutor::new(&store, &roles, &ids)
            .execute(&[decision("Zezima", 1)], &roster())
            .await;
        assert!(matches!(report.outcomes[0].roles, RoleOutcome::Skipped(_)));

        let ids = role_ids();
        let report = PromotionExecutor::new(&store, &roles, &ids)
            .execute(&[decision("Zezima", 1)], &roster())
            .await;
        assert_eq!(
            report.outcomes[0].roles,
            RoleOutcome::Skipped("not in guild".to_string())
        );
    }

    #[tokio::test]
    async fn nothing_to_do_for_no_decisions() {
        let store = MemoryRoster::default();
        let roles = roles_with(&[]);
        let ids = role_ids();
        let report = PromotionExecutor::new(&store, &roles, &ids).execute(&[], &roster()).await;
        assert!(report.outcomes.is_empty());
        assert!(report.notification.is_empty());
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn non_ascii_names_decided_by_the_engine_are_written_back() {
        let store = MemoryRoster::default();
        let members = vec![RosterMember {
            row: 7,
            name: "Élodie".into(),
            external_id: None,
            rank: Some(Rank::Sage),
            progress_counter: 10,
            enrolled_at: None,
        }];
        let active = std::collections::HashSet::from(["ÉLODIE".to_string()]);
        let decisions = crate::promotion::PromotionEngine::new(crate::ranks::RankLadder::default())
            .decide(&active, &members, chrono::Utc::now());
        assert_eq!(decisions.len(), 1);

        let mut renamed = decisions[0].clone();
        renamed.member_name = "élodie".into();
        let updates = roster_updates(&[renamed], &members, &store);
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.row == 7));
    }
}
