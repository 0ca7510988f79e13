//! Prompt layout: framing, repository context, optional diff, history, new message.

use crate::context::ContextArtifact;
use crate::provider::PromptPart;
use crate::session::ConversationTurn;

pub const SOURCE_BEGIN: &str = "<Source Code Begin>";
pub const SOURCE_END: &str = "<Source Code End>";
pub const DIFF_BEGIN: &str = "<Diff Content Begin>";
pub const DIFF_END: &str = "<Diff Content End>";

const FRAMING: &[&str] = &[
    "The repository source below is made of several files. Each file starts with a \
     `--- BEGIN FILE: <path> ---` line and ends with a matching `--- END FILE: <path> ---` line. \
     Whenever you refer to a part of the code, name the file path so the user can find it.",
    "When you return code to the user and the location matters, put the file path at the top \
     of each code block.",
];

fn context_part(artifact: &ContextArtifact) -> PromptPart {
    match &artifact.document {
        Some(doc) => PromptPart::Document(doc.clone()),
        None => PromptPart::Text(artifact.text.clone()),
    }
}

/// Build the ordered prompt parts for `message`.
///
/// `history` holds only the turns before the new message.
pub fn assemble(
    full: &ContextArtifact,
    diff: Option<&ContextArtifact>,
    history: &[ConversationTurn],
    message: &str,
) -> Vec<PromptPart> {
    let mut parts: Vec<PromptPart> = FRAMING.iter().map(|s| PromptPart::text(*s)).collect();

    parts.push(PromptPart::text(SOURCE_BEGIN));
    parts.push(context_part(full));
    parts.push(PromptPart::text(SOURCE_END));

    if let Some(diff) = diff {
        let between = diff.label.as_deref().unwrap_or("the selected refs");
        parts.push(PromptPart::text(format!(
            "The diff between the branches {between} is as follows:"
        )));
        parts.push(PromptPart::text(DIFF_BEGIN));
        parts.push(context_part(diff));
        parts.push(PromptPart::text(DIFF_END));
    }

    for turn in history {
        parts.push(PromptPart::text(format!("user: {}", turn.user)));
        parts.push(PromptPart::text(format!("ai: {}", turn.assistant)));
    }

    parts.push(PromptPart::text(format!("user:\n{message}")));
    parts
}
