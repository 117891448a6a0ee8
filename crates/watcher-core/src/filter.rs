//! Event filtering applied uniformly to webhook and polled events (spec §4.3.2).

/// The terminal/cancelled state names issue-tracker platforms use instead of
/// `closed` (e.g. Linear's `Done`/`Cancelled`).
const TERMINAL_STATE_NAMES: &[&str] = &["Done", "Cancelled", "Canceled"];

const AUTOMATED_PR_ACTIONS: &[&str] = &[
    "synchronize",
    "update",
    "edited",
    "labeled",
    "unlabeled",
    "assigned",
    "unassigned",
    "locked",
    "unlocked",
];

/// The fields `should_process` keys its decision on (spec §4.3.2).
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub kind: &'a str,
    pub action: &'a str,
    pub state: &'a str,
    pub has_recent_human_activity: bool,
}

fn is_pull_request_like(kind: &str) -> bool {
    matches!(kind, "pull_request" | "merge_request")
}

/// Returns `true` when the event should be dropped (spec §4.3.2).
pub fn should_drop(input: FilterInput<'_>) -> bool {
    if matches!(input.action, "opened" | "open") {
        return true;
    }

    if is_pull_request_like(input.kind) && AUTOMATED_PR_ACTIONS.contains(&input.action) {
        return true;
    }

    if is_pull_request_like(input.kind)
        && input.action == crate::event::POLL_ACTION
        && !input.has_recent_human_activity
    {
        return true;
    }

    if input.state == "closed" && !matches!(input.action, "reopened" | "reopen") {
        return true;
    }

    if TERMINAL_STATE_NAMES.contains(&input.state) {
        return true;
    }

    false
}

/// Messaging events are actionable only when the inner event type is an
/// `app_mention` (spec §4.3.2). Messaging providers call this in addition to
/// `should_drop` since the messaging inner-type check has no analog in the
/// `(type, action, state)` tuple used by code-forge/issue-tracker providers.
pub fn should_drop_messaging(inner_event_type: &str) -> bool {
    inner_event_type != "app_mention"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(kind: &str, action: &str, state: &str, activity: bool) -> FilterInput<'static> {
        FilterInput {
            kind: Box::leak(kind.to_string().into_boxed_str()),
            action: Box::leak(action.to_string().into_boxed_str()),
            state: Box::leak(state.to_string().into_boxed_str()),
            has_recent_human_activity: activity,
        }
    }

    #[test]
    fn opened_is_dropped() {
        assert!(should_drop(input("issue", "opened", "open", true)));
    }

    #[test]
    fn automated_pr_action_is_dropped() {
        assert!(should_drop(input(
            "pull_request",
            "synchronize",
            "open",
            true
        )));
    }

    #[test]
    fn polled_pr_without_human_activity_is_dropped() {
        assert!(should_drop(input(
            "pull_request",
            crate::event::POLL_ACTION,
            "open",
            false
        )));
    }

    #[test]
    fn polled_pr_with_human_activity_is_kept() {
        assert!(!should_drop(input(
            "pull_request",
            crate::event::POLL_ACTION,
            "open",
            true
        )));
    }

    #[test]
    fn closed_non_reopen_is_dropped() {
        assert!(should_drop(input("issue", "edited", "closed", true)));
    }

    #[test]
    fn reopened_from_closed_state_is_kept() {
        assert!(!should_drop(input("issue", "reopened", "closed", true)));
    }

    #[test]
    fn terminal_tracker_state_is_dropped() {
        assert!(should_drop(input("issue", "commented", "Done", true)));
    }

    #[test]
    fn ordinary_comment_is_kept() {
        assert!(!should_drop(input("issue", "created", "open", true)));
    }

    #[test]
    fn messaging_non_mention_is_dropped() {
        assert!(should_drop_messaging("message"));
        assert!(!should_drop_messaging("app_mention"));
    }
}
