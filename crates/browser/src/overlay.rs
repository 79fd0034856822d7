//! Blocking-overlay heuristic.
//!
//! Scans accessibility-snapshot text for dialogs, modals, and tooltips and
//! suggests which element uids look like dismiss controls. Advisory only:
//! the result is injected as a warning into the next model input and never
//! dismisses anything by itself.

use once_cell::sync::Lazy;
use regex::Regex;

/// ARIA markers that flag a line as part of a blocking overlay.
const OVERLAY_MARKERS: &[&str] = &[
    r#"role="dialog""#,
    r#"role="alertdialog""#,
    r#"role="tooltip""#,
    r#"aria-modal="true""#,
];

/// Role tokens as they appear in rendered accessibility trees.
static ROLE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(alertdialog|dialog|tooltip)\b").unwrap());

/// Phrases that typically label a dismiss control.
const DISMISS_PHRASES: &[&str] = &[
    "close", "dismiss", "got it", "no thanks", "accept", "ok", "×", "x button", "cancel",
];

static UID_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"uid=([\w.-]+)").unwrap());

/// How many overlay lines are kept for the human-readable description.
const MAX_DESCRIBED_LINES: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct OverlayScan {
    pub has_overlay: bool,
    pub description: String,
    pub suggested_action: Option<String>,
}

/// Scan raw snapshot text for likely blocking UI.
pub fn scan_snapshot(snapshot: &str) -> OverlayScan {
    let mut overlay_lines: Vec<&str> = Vec::new();
    let mut dismiss_uids: Vec<String> = Vec::new();

    for line in snapshot.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if OVERLAY_MARKERS.iter().any(|m| trimmed.contains(m)) || ROLE_TOKEN.is_match(trimmed) {
            if overlay_lines.len() < MAX_DESCRIBED_LINES {
                overlay_lines.push(trimmed);
            } else if overlay_lines.len() == MAX_DESCRIBED_LINES {
                // Still counts as an overlay, just not described.
                overlay_lines.push("");
            }
        }

        // Candidate dismiss controls: uid-bearing button/link lines whose
        // label matches a known dismiss phrase.
        let lower = trimmed.to_lowercase();
        if lower.contains("button") || lower.contains("link") {
            if let Some(captures) = UID_REF.captures(trimmed) {
                if DISMISS_PHRASES.iter().any(|p| lower.contains(p)) {
                    dismiss_uids.push(captures[1].to_string());
                }
            }
        }
    }

    if overlay_lines.is_empty() {
        return OverlayScan::default();
    }

    let description = overlay_lines
        .iter()
        .filter(|l| !l.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("; ");

    let suggested_action = if dismiss_uids.is_empty() {
        None
    } else {
        Some(format!(
            "Candidate dismiss controls: {}",
            dismiss_uids
                .iter()
                .map(|uid| format!("uid={}", uid))
                .collect::<Vec<_>>()
                .join(", ")
        ))
    };

    OverlayScan {
        has_overlay: true,
        description,
        suggested_action,
    }
}

/// Format an overlay scan as a model-facing warning, or None if clear.
pub fn overlay_warning(scan: &OverlayScan) -> Option<String> {
    if !scan.has_overlay {
        return None;
    }
    let mut warning = format!(
        "Warning: the page appears to have a blocking overlay ({}). \
         It may need to be dismissed before other elements are interactable.",
        scan.description
    );
    if let Some(suggestion) = &scan.suggested_action {
        warning.push(' ');
        warning.push_str(suggestion);
    }
    Some(warning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialog_role_marker_detected() {
        let snapshot = "uid=1 div role=\"dialog\" \"Subscribe to our newsletter\"";
        let scan = scan_snapshot(snapshot);
        assert!(scan.has_overlay);
        assert!(scan.description.contains("newsletter"));
    }

    #[test]
    fn test_plain_snapshot_is_clear() {
        let snapshot = "uid=1 heading \"Example Domain\"\nuid=2 paragraph \"Some text\"";
        let scan = scan_snapshot(snapshot);
        assert!(!scan.has_overlay);
        assert!(scan.suggested_action.is_none());
        assert!(overlay_warning(&scan).is_none());
    }

    #[test]
    fn test_aria_modal_marker() {
        let scan = scan_snapshot("uid=4 section aria-modal=\"true\" \"Cookie consent\"");
        assert!(scan.has_overlay);
    }

    #[test]
    fn test_dismiss_candidates_collected() {
        let snapshot = "\
uid=1 dialog \"Cookie consent\"
uid=2 button \"Accept\"
uid=3 button \"No thanks\"
uid=4 link \"Privacy policy\"";
        let scan = scan_snapshot(snapshot);
        assert!(scan.has_overlay);
        let suggestion = scan.suggested_action.unwrap();
        assert!(suggestion.contains("uid=2"));
        assert!(suggestion.contains("uid=3"));
        assert!(!suggestion.contains("uid=4"));
    }

    #[test]
    fn test_description_capped_at_three_lines() {
        let snapshot = "\
uid=1 dialog \"a\"
uid=2 dialog \"b\"
uid=3 dialog \"c\"
uid=4 dialog \"d\"";
        let scan = scan_snapshot(snapshot);
        assert!(scan.has_overlay);
        assert_eq!(scan.description.matches("dialog").count(), 3);
    }

    #[test]
    fn test_dismiss_requires_button_or_link_context() {
        // "close" inside a paragraph should not become a candidate.
        let snapshot = "\
uid=1 dialog \"Notice\"
uid=5 paragraph \"close the tab when done\"";
        let scan = scan_snapshot(snapshot);
        assert!(scan.has_overlay);
        assert!(scan.suggested_action.is_none());
    }

    #[test]
    fn test_warning_text() {
        let scan = scan_snapshot("uid=1 dialog \"Promo\"\nuid=2 button \"Close\"");
        let warning = overlay_warning(&scan).unwrap();
        assert!(warning.contains("blocking overlay"));
        assert!(warning.contains("uid=2"));
    }
}
