//! Virtual fix-gate story synthesized when the repository is unhealthy.

use crate::core::story::Story;
use crate::core::types::StoryStatus;

pub const FIX_GATE_ID: &str = "fix_gate_virtual";
pub const FIX_GATE_ROLE: &str = "QA Engineer/Tester";

const IMPORT_SIGNAL: &str = "import errors";
const TESTS_SIGNAL: &str = "failing tests/coverage";

/// Build the fix-gate story, or `None` when both health signals pass.
pub fn synthesize(import_ok: bool, tests_ok: bool) -> Option<Story> {
    if import_ok && tests_ok {
        return None;
    }
    let mut failed = Vec::new();
    if !import_ok {
        failed.push(IMPORT_SIGNAL);
    }
    if !tests_ok {
        failed.push(TESTS_SIGNAL);
    }

    let mut story = Story::new(FIX_GATE_ID);
    story.title = format!("Fix Gate: {}", failed.join(" & "));
    story.priority = 0;
    story.status = StoryStatus::Ready;
    story.risk_level = "low".to_string();
    story.assigned_role = Some(FIX_GATE_ROLE.to_string());
    story.acceptance_criteria = vec![
        "Imports succeed from WORKSPACE_ROOT".to_string(),
        "Pytest suite passes with required coverage".to_string(),
    ];
    story.auto_generated = true;
    Some(story)
}

pub fn is_fix_gate(story: &Story) -> bool {
    story.id == FIX_GATE_ID
}
