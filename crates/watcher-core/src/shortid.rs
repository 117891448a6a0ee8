//! Derivation of `EVENT_SAFE_ID` and `EVENT_SHORT_ID` from an event id
//! (spec §4.6, §8 quantified invariants). Isolated from the executor so the
//! derivation rules can be tested without spawning anything.

/// `EVENT_ID` with all non-`[A-Za-z0-9_-]` bytes replaced by `_`.
pub fn safe_id(event_id: &str) -> String {
    event_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `{provider}-{repo-with-slashes-as-dashes}-{number}-{last-6-alphanumerics-of-EVENT_ID-lowercased}`.
pub fn short_id(provider: &str, repository: &str, number: u64, event_id: &str) -> String {
    let repo_dashed = repository.replace('/', "-");
    let tail = last_six_alphanumeric_lowercase(event_id);
    format!("{provider}-{repo_dashed}-{number}-{tail}")
}

fn last_six_alphanumeric_lowercase(event_id: &str) -> String {
    let alnum: Vec<char> = event_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let start = alnum.len().saturating_sub(6);
    alnum[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_id_only_contains_allowed_chars() {
        let id = safe_id("github:o/r:created:9:d1+xyz");
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn short_id_dashes_repo_slashes() {
        let id = short_id("github", "o/r", 42, "github:o/r:created:9:abcdef");
        assert!(id.starts_with("github-o-r-42-"));
    }

    #[test]
    fn short_id_length_bound() {
        let provider = "github";
        let repo = "o/r";
        let repo_dashed = repo.replace('/', "-");
        let number = 42u64;
        let event_id = "github:o/r:created:9:abcdef";
        let id = short_id(provider, repo, number, event_id);
        let max_len = provider.len() + repo_dashed.len() + number.to_string().len() + 6 + 3;
        assert!(id.len() <= max_len);
    }

    #[test]
    fn short_id_tail_is_lowercase() {
        let id = short_id("github", "o/r", 42, "github:o/r:created:9:ABCDEF");
        assert!(id.ends_with("abcdef"));
    }
}
