//! Classifies raw feed messages into achievement or loot records.
//!
//! Pure text processing: valuation of the extracted loot happens in the caller.

use std::sync::OnceLock;

use regex::Regex;

/// Which heuristic a feed channel's messages follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// `<name> - :emoji: 99 Skill` style achievement posts.
    Achievements,
    /// `<name>:` followed by a drop list.
    LootNotifications,
    /// `<name>:` followed by a collection-log entry.
    LogNotifications,
}

impl ChannelKind {
    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::Achievements => "achievements",
            ChannelKind::LootNotifications => "loot notifications",
            ChannelKind::LogNotifications => "log notifications",
        }
    }

    fn is_notification(self) -> bool {
        !matches!(self, ChannelKind::Achievements)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Achievement,
    Notification,
}

/// One drop line pulled out of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootLine {
    pub raw_text: String,
    pub quantity: u32,
    pub item_name_guess: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedMessage {
    pub member_name: String,
    pub text: String,
    pub kind: MessageKind,
    pub loot: Vec<LootLine>,
}

const IGNORED_PREFIXES: [&str; 4] = ["!", "/", "<@", "http"];
const MIN_BARE_ITEM_LEN: usize = 4;
const MAX_BARE_ITEM_LEN: usize = 50;

fn achievement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*-\s*:.+?:\s*\d+\s*.+").expect("valid regex"))
}

fn name_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?):(.*)$").expect("valid regex"))
}

fn quantity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)\s*x\s*(.+)$").expect("valid regex"))
}

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<@!?\d+>").expect("valid regex"))
}

fn non_loot_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(?i)^total value:",
            r"(?i)^loot from",
            r"(?i)^drops from",
            r"(?i)has received",
            r"(?i)has gained",
            r"^\d+:\d+",
            r"(?i)^image$",
            r"^-+$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

/// Classifies one message body. Returns `None` when neither heuristic applies.
pub fn classify(text: &str, channel: ChannelKind) -> Option<ClassifiedMessage> {
    let content = text.trim();
    if content.is_empty() || IGNORED_PREFIXES.iter().any(|p| content.starts_with(p)) {
        return None;
    }

    let classified = if channel.is_notification() {
        parse_notification(content)
            .or_else(|| parse_achievement(content))
            .or_else(|| parse_inline_notification(content))
    } else {
        // No inline `Name: text` form in the achievements feed.
        parse_achievement(content).or_else(|| parse_notification(content))
    }?;

    let member_name = clean_member_name(&classified.member_name);
    if member_name.is_empty() {
        return None;
    }

    Some(ClassifiedMessage {
        member_name,
        ..classified
    })
}

fn parse_achievement(content: &str) -> Option<ClassifiedMessage> {
    let caps = achievement_re().captures(content)?;
    Some(ClassifiedMessage {
        member_name: caps[1].trim().to_string(),
        text: content.to_string(),
        kind: MessageKind::Achievement,
        loot: Vec::new(),
    })
}

fn split_first_line(content: &str) -> (&str, String) {
    let mut lines = content.lines();
    let first_line = lines.next().unwrap_or_default().trim();
    let rest = lines.collect::<Vec<_>>().join("\n");
    (first_line, rest.trim().to_string())
}

fn parse_notification(content: &str) -> Option<ClassifiedMessage> {
    let (first_line, rest) = split_first_line(content);
    let name = first_line.strip_suffix(':')?;
    let (text, loot) = if rest.is_empty() {
        (first_line.to_string(), Vec::new())
    } else {
        (format!("{first_line} {rest}"), extract_loot_lines(&rest))
    };
    Some(ClassifiedMessage {
        member_name: name.trim().to_string(),
        text,
        kind: MessageKind::Notification,
        loot,
    })
}

/// `Name: 1 x Item` with the drop on the same line as the name.
fn parse_inline_notification(content: &str) -> Option<ClassifiedMessage> {
    let (first_line, rest) = split_first_line(content);
    let caps = name_prefix_re().captures(first_line)?;
    let details = [caps[2].trim(), rest.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    Some(ClassifiedMessage {
        member_name: caps[1].trim().to_string(),
        text: content.to_string(),
        kind: MessageKind::Notification,
        loot: extract_loot_lines(&details),
    })
}

/// Strips mentions, collapses whitespace and drops trailing punctuation.
pub fn clean_member_name(name: &str) -> String {
    let without_mentions = mention_re().replace_all(name, "");
    let collapsed = without_mentions.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', '!', '?', ';'])
        .trim()
        .to_string()
}

/// Pulls every line that looks like a drop out of a notification body.
pub fn extract_loot_lines(text: &str) -> Vec<LootLine> {
    text.lines().filter_map(parse_loot_line).collect()
}

/// `"50 x Dragon bones"` → 50 × "Dragon bones"; `"Dragon claws"` → 1 × "Dragon claws".
pub fn parse_loot_line(line: &str) -> Option<LootLine> {
    let line = line.trim();
    if line.is_empty() || non_loot_res().iter().any(|re| re.is_match(line)) {
        return None;
    }

    if let Some(caps) = quantity_re().captures(line) {
        let quantity: u32 = caps[1].parse().ok().filter(|q| *q > 0)?;
        return Some(LootLine {
            raw_text: line.to_string(),
            quantity,
            item_name_guess: caps[2].trim().to_string(),
        });
    }

    let len = line.chars().count();
    let looks_like_item = (MIN_BARE_ITEM_LEN..=MAX_BARE_ITEM_LEN).contains(&len)
        && line.chars().any(|c| c.is_ascii_alphabetic());
    looks_like_item.then(|| LootLine {
        raw_text: line.to_string(),
        quantity: 1,
        item_name_guess: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_skill_achievement() {
        let msg = classify("NMZ WARRI0R - :defence: 99 Defence", ChannelKind::Achievements).unwrap();
        assert_eq!(msg.member_name, "NMZ WARRI0R");
        assert_eq!(msg.text, "NMZ WARRI0R - :defence: 99 Defence");
        assert_eq!(msg.kind, MessageKind::Achievement);
        assert!(msg.loot.is_empty());
    }

    #[test]
    fn classifies_loot_notification() {
        let body = "OhYaPapi:\nLoot from Chambers of Xeric\nDragon claws\n50 x Dragon bones\nTotal value: 50M";
        let msg = classify(body, ChannelKind::LootNotifications).unwrap();
        assert_eq!(msg.member_name, "OhYaPapi");
        assert_eq!(msg.kind, MessageKind::Notification);
        assert!(msg.text.starts_with("OhYaPapi: Loot from"));
        let items: Vec<_> = msg.loot.iter().map(|l| (l.quantity, l.item_name_guess.as_str())).collect();
        assert_eq!(items, vec![(1, "Dragon claws"), (50, "Dragon bones")]);
    }

    #[test]
    fn notification_without_body_has_no_loot() {
        let msg = classify("Zezima:", ChannelKind::LogNotifications).unwrap();
        assert_eq!(msg.member_name, "Zezima");
        assert_eq!(msg.text, "Zezima:");
        assert!(msg.loot.is_empty());
    }

    #[test]
    fn same_line_drop_is_extracted() {
        let msg = classify("Zezima: 1 x Avernic treads", ChannelKind::LootNotifications).unwrap();
        assert_eq!(msg.member_name, "Zezima");
        assert_eq!(msg.loot.len(), 1);
        assert_eq!(msg.loot[0].item_name_guess, "Avernic treads");
    }

    #[test]
    fn falls_back_to_other_heuristic() {
        let msg = classify("Lynx Titan - :attack: 99 Attack", ChannelKind::LootNotifications).unwrap();
        assert_eq!(msg.kind, MessageKind::Achievement);
        assert_eq!(msg.member_name, "Lynx Titan");

        let msg = classify("Woox:\nTwisted bow", ChannelKind::Achievements).unwrap();
        assert_eq!(msg.kind, MessageKind::Notification);
        assert_eq!(msg.member_name, "Woox");
    }

    #[test]
    fn colon_chat_in_achievements_feed_is_not_a_member() {
        assert_eq!(classify("gz all: huge", ChannelKind::Achievements), None);
        assert_eq!(classify("brb: dinner\nback soon", ChannelKind::Achievements), None);

        let msg = classify("Zezima: 1 x Dragon claws", ChannelKind::LogNotifications).unwrap();
        assert_eq!(msg.member_name, "Zezima");
    }

    #[test]
    fn unclassifiable_text_returns_none() {
        assert_eq!(classify("gz everyone", ChannelKind::Achievements), None);
        assert_eq!(classify("nice drop", ChannelKind::LootNotifications), None);
        assert_eq!(classify("   ", ChannelKind::LogNotifications), None);
    }

    #[test]
    fn commands_mentions_and_links_are_ignored() {
        for text in [
            "!eom january",
            "/status",
            "<@1234> - :defence: 99 Defence",
            "https://example.com: a link",
        ] {
            assert_eq!(classify(text, ChannelKind::Achievements), None, "{text}");
            assert_eq!(classify(text, ChannelKind::LootNotifications), None, "{text}");
        }
    }

    #[test]
    fn cleans_member_names() {
        assert_eq!(clean_member_name("  Big   <@!42> Bob!! "), "Big Bob");
        assert_eq!(clean_member_name("Iron Man."), "Iron Man");
    }

    #[test]
    fn parses_loot_lines() {
        let line = parse_loot_line("50 x Dragon bones").unwrap();
        assert_eq!(line.quantity, 50);
        assert_eq!(line.item_name_guess, "Dragon bones");

        let line = parse_loot_line("Dragon claws").unwrap();
        assert_eq!(line.quantity, 1);
        assert_eq!(line.item_name_guess, "Dragon claws");

        let line = parse_loot_line("3X Law rune").unwrap();
        assert_eq!(line.quantity, 3);
        assert_eq!(line.item_name_guess, "Law rune");
    }

    #[test]
    fn rejects_non_loot_lines() {
        for line in [
            "Total value: 1,234 gp",
            "Loot from Vorkath",
            "12:45",
            "Image",
            "-----",
            "Bob has received a new collection log item",
            "abc",
            "12345",
            "This line is far too long to be a single item name in a drop list",
        ] {
            assert_eq!(parse_loot_line(line), None, "{line}");
        }
    }
}
