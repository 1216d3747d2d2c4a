//! Chat-facing text: monthly summaries, promotion notices and pagination.

use crate::aggregator::MonthlyAchievements;
use crate::promotion::PromotionDecision;
use crate::valuation::format_value;

/// Discord rejects message content above this many characters.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
/// Head-room left in every chunk when a body has to be split.
pub const MESSAGE_SAFETY_MARGIN: usize = 100;

const ACHIEVEMENTS_SHOWN_PER_MEMBER: usize = 3;
const ACHIEVEMENT_PREVIEW_CHARS: usize = 100;

/// Splits `content` into messages of at most `limit` characters, cutting at
/// line boundaries. A single line longer than a chunk is cut mid-line.
pub fn split_message(content: &str, limit: usize) -> Vec<String> {
    if content.chars().count() <= limit {
        return vec![content.to_string()];
    }
    let budget = if limit > MESSAGE_SAFETY_MARGIN * 2 {
        limit - MESSAGE_SAFETY_MARGIN
    } else {
        limit
    };

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in content.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > budget && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > budget {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(budget) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .map(|c| c.trim_end_matches('\n').to_string())
        .filter(|c| !c.trim().is_empty())
        .collect()
}

/// `1.5M gp`. Values under a thousand are shown raw.
pub fn format_gp(value: u64) -> String {
    format!("{} gp", format_value(value))
}

fn preview(text: &str) -> String {
    if text.chars().count() > ACHIEVEMENT_PREVIEW_CHARS {
        let head: String = text.chars().take(ACHIEVEMENT_PREVIEW_CHARS - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Per-member breakdown, busiest members first.
pub fn achievement_summary(achievements: &MonthlyAchievements) -> String {
    if achievements.is_empty() {
        return "No achievements found for the specified month.".to_string();
    }

    let total_achievements: usize = achievements.values().map(|m| m.achievements.len()).sum();
    let total_loot: u64 = achievements.values().map(|m| m.total_loot_value).sum();

    let mut lines = vec![
        format!(
            "**Achievement Summary ({} members, {} total achievements)**",
            achievements.len(),
            total_achievements
        ),
        String::new(),
    ];

    let mut members: Vec<_> = achievements.values().collect();
    // stable, so ties stay alphabetical
    members.sort_by(|a, b| b.achievements.len().cmp(&a.achievements.len()));

    for member in members {
        let loot = if member.total_loot_value > 0 {
            format!(", {} in loot", format_gp(member.total_loot_value))
        } else {
            String::new()
        };
        lines.push(format!(
            "**{}** ({} achievements{})",
            member.member_name,
            member.achievements.len(),
            loot
        ));
        for record in member.achievements.iter().take(ACHIEVEMENTS_SHOWN_PER_MEMBER) {
            lines.push(format!("  • {}", preview(&record.text)));
        }
        if member.achievements.len() > ACHIEVEMENTS_SHOWN_PER_MEMBER {
            lines.push(format!(
                "  • ... and {} more",
                member.achievements.len() - ACHIEVEMENTS_SHOWN_PER_MEMBER
            ));
        }
        lines.push(String::new());
    }

    if total_loot > 0 {
        lines.push(format!("**Total Loot Value: {}**", format_gp(total_loot)));
    }
    lines.join("\n").trim_end().to_string()
}

pub fn promotion_summary(promotions: &[PromotionDecision]) -> String {
    if promotions.is_empty() {
        return "No rank promotions this month.".to_string();
    }
    let mut lines = vec![
        format!("**Rank Promotions Summary ({} promotions)**", promotions.len()),
        String::new(),
    ];
    lines.extend(
        promotions
            .iter()
            .map(|p| format!("**{}**: {} → {}", p.member_name, p.from_rank, p.to_rank)),
    );
    lines.join("\n")
}

/// Rank-change channel announcement, mentioning members when their id is known.
pub fn promotion_announcement(promotions: &[PromotionDecision]) -> Option<String> {
    if promotions.is_empty() {
        return None;
    }
    let mut lines = vec!["🎉 **Rank Promotions** 🎉".to_string(), String::new()];
    lines.extend(promotions.iter().map(|p| {
        let who = match p.external_id {
            Some(id) => format!("<@{id}>"),
            None => p.member_name.clone(),
        };
        format!(
            "**{}** has been promoted from **{}** to **{}**!",
            who, p.from_rank, p.to_rank
        )
    }));
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AchievementRecord, MonthlyMemberSummary};
    use crate::classifier::ChannelKind;
    use crate::ranks::Rank;

    fn member(name: &str, achievements: &[&str], loot: u64) -> MonthlyMemberSummary {
        MonthlyMemberSummary {
            member_name: name.to_string(),
            achievements: achievements
                .iter()
                .map(|t| AchievementRecord {
                    member_name: name.to_string(),
                    text: t.to_string(),
                    source: ChannelKind::Achievements,
                })
                .collect(),
            loot_lines: Vec::new(),
            total_loot_value: loot,
        }
    }

    #[test]
    fn long_bodies_split_on_line_boundaries() {
        let line = "x".repeat(49);
        let body = vec![line.clone(); 100].join("\n");
        assert_eq!(body.chars().count(), 4999);

        let chunks = split_message(&body, DISCORD_MESSAGE_LIMIT);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= DISCORD_MESSAGE_LIMIT);
            assert!(chunk.lines().all(|l| l == line));
        }
        let total_lines: usize = chunks.iter().map(|c| c.lines().count()).sum();
        assert_eq!(total_lines, 100);
    }

    #[test]
    fn short_bodies_stay_whole() {
        assert_eq!(split_message("hello\nworld", DISCORD_MESSAGE_LIMIT), vec!["hello\nworld"]);
    }

    #[test]
    fn oversized_single_line_is_cut() {
        let body = "y".repeat(4500);
        let chunks = split_message(&body, DISCORD_MESSAGE_LIMIT);
        assert!(chunks.iter().all(|c| c.chars().count() <= DISCORD_MESSAGE_LIMIT));
        assert_eq!(chunks.concat().len(), 4500);
    }

    #[test]
    fn achievement_summary_orders_and_truncates() {
        let long = "a".repeat(150);
        let mut achievements = MonthlyAchievements::new();
        achievements.insert("Quiet".into(), member("Quiet", &["one"], 0));
        achievements.insert(
            "Busy".into(),
            member("Busy", &["first", "second", long.as_str(), "fourth", "fifth"], 2_500_000),
        );

        let text = achievement_summary(&achievements);
        assert!(text.starts_with("**Achievement Summary (2 members, 6 total achievements)**"));
        let busy = text.find("**Busy** (5 achievements, 2.5M gp in loot)").unwrap();
        let quiet = text.find("**Quiet** (1 achievements)").unwrap();
        assert!(busy < quiet);
        assert!(text.contains(&format!("  • {}...", "a".repeat(97))));
        assert!(text.contains("  • ... and 2 more"));
        assert!(!text.contains("fourth"));
        assert!(text.ends_with("**Total Loot Value: 2.5M gp**"));
    }

    #[test]
    fn empty_month_has_fixed_message() {
        assert_eq!(
            achievement_summary(&MonthlyAchievements::new()),
            "No achievements found for the specified month."
        );
    }

    #[test]
    fn promotion_texts() {
        let decisions = vec![
            PromotionDecision {
                member_name: "Zezima".into(),
                from_rank: Rank::Sage,
                to_rank: Rank::Destroyer,
                external_id: Some(42),
            },
            PromotionDecision {
                member_name: "Woox".into(),
                from_rank: Rank::Mediator,
                to_rank: Rank::Sage,
                external_id: None,
            },
        ];
        let summary = promotion_summary(&decisions);
        assert!(summary.contains("(2 promotions)"));
        assert!(summary.contains("**Zezima**: Sage → Destroyer"));

        let announcement = promotion_announcement(&decisions).unwrap();
        assert!(announcement.contains("**<@42>** has been promoted from **Sage** to **Destroyer**!"));
        assert!(announcement.contains("**Woox** has been promoted from **Mediator** to **Sage**!"));

        assert_eq!(promotion_summary(&[]), "No rank promotions this month.");
        assert!(promotion_announcement(&[]).is_none());
    }
}
