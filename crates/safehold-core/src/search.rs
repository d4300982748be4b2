//! Fuzzy entry search below a group.

use crate::models::{Entry, Group, SearchHit};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

/// Maximum number of hits returned for one query.
pub const MAX_RESULTS: usize = 50;

/// Score every entry below `group` against `query`, best match first.
///
/// Groups flagged as recycle bin are skipped. An empty or whitespace-only
/// query yields no hits.
pub fn search_group(group: &Group, query: &str) -> Vec<SearchHit> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let matcher = SkimMatcherV2::default();

    let mut items = Vec::new();
    collect_entries(group, "", &mut items);

    let mut scored: Vec<_> = items
        .into_iter()
        .filter_map(|(entry, path)| {
            let search_text = format!("{} {} {} {}", entry.title, entry.username, entry.url, path);
            matcher
                .fuzzy_match(&search_text, query)
                .map(|score| SearchHit { entry, path, score })
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(MAX_RESULTS);
    scored
}

fn collect_entries(group: &Group, path: &str, items: &mut Vec<(Entry, String)>) {
    if group.is_recycle_bin {
        return;
    }

    let current_path = if path.is_empty() {
        group.name.clone()
    } else {
        format!("{} / {}", path, group.name)
    };

    for entry in &group.entries {
        items.push((entry.clone(), current_path.clone()));
    }

    for child in &group.children {
        collect_entries(child, &current_path, items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(title: &str, username: &str) -> Entry {
        Entry {
            uuid: Uuid::new_v4(),
            title: title.to_string(),
            username: username.to_string(),
            ..Entry::default()
        }
    }

    fn group(name: &str, entries: Vec<Entry>, children: Vec<Group>) -> Group {
        Group {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            children,
            entries,
            is_recycle_bin: false,
        }
    }

    #[test]
    fn finds_entries_in_nested_groups_with_path() {
        let root = group(
            "Root",
            vec![entry("Mail", "me")],
            vec![group("Work", vec![entry("GitLab", "dev")], vec![])],
        );

        let hits = search_group(&root, "gitlab");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.title, "GitLab");
        assert_eq!(hits[0].path, "Root / Work");
    }

    #[test]
    fn recycle_bin_is_not_searched() {
        let mut bin = group("Recycle Bin", vec![entry("Old bank", "x")], vec![]);
        bin.is_recycle_bin = true;
        let root = group("Root", vec![], vec![bin]);

        assert!(search_group(&root, "bank").is_empty());
    }

    #[test]
    fn blank_query_yields_nothing() {
        let root = group("Root", vec![entry("Mail", "me")], vec![]);
        assert!(search_group(&root, "   ").is_empty());
    }
}
