//! Prompt assembly for one conversational turn.

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
};

/// Builds the backend request for one turn: a single system message carrying
/// the persona, the user's profile text, and the recent history, followed by
/// the current message verbatim.
///
/// Pure function; history lines are passed through in their original
/// chronological order without re-summarization.
pub fn build_context(
    persona: &str,
    profile_text: &str,
    history: &[String],
    current_message: &str,
) -> anyhow::Result<Vec<ChatCompletionRequestMessage>> {
    let profile_section = if profile_text.trim().is_empty() {
        "No specific profile data available."
    } else {
        profile_text
    };
    let history_section = if history.is_empty() {
        "No previous conversation.".to_string()
    } else {
        history.join("\n")
    };

    let system_prompt = format!(
        "{persona}\n\
         \n\
         USER PROFILE DATA:\n\
         {profile_section}\n\
         \n\
         RECENT CONVERSATION HISTORY:\n\
         {history_section}\n\
         \n\
         Instructions:\n\
         - Use the profile data to personalize your response style and approach\n\
         - Maintain conversation continuity using the history provided\n\
         - Be specific and actionable in your guidance\n\
         - Keep responses concise but comprehensive"
    );

    Ok(vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()?
            .into(),
        ChatCompletionRequestUserMessageArgs::default()
            .content(current_message)
            .build()?
            .into(),
    ])
}

#[cfg(test)]
pub(crate) fn system_text(messages: &[ChatCompletionRequestMessage]) -> String {
    use async_openai::types::ChatCompletionRequestSystemMessageContent;
    match &messages[0] {
        ChatCompletionRequestMessage::System(msg) => match &msg.content {
            ChatCompletionRequestSystemMessageContent::Text(text) => text.clone(),
            _ => panic!("expected text system content"),
        },
        _ => panic!("expected system message first"),
    }
}
