//! Prompt text for the forensic agent.

use crate::coral::Mention;
use crate::tool::ToolDescription;

pub const BASE_PROMPT: &str = "You are an agent that specialises in analysing articles,
images, social media posts or any other content for misinformation.
You use information from a multitude of tools to make a judgement on
the factual correctness and intent of the content in question.

Always summarise and explain how you got to your conclusion, quoting
any sources while highlighting how reputable these sources could be.";

/// One `Tool: <name>, Schema: <json>` line per tool.
pub fn tools_description(tools: &[ToolDescription]) -> String {
    tools
        .iter()
        .map(|tool| {
            let schema = tool
                .parameters
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "{}".to_string());
            format!("Tool: {}, Schema: {}", tool.name, schema)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt used when answering mentions relayed by a Coral server.
pub fn coral_system_prompt(
    coral_tools: &[ToolDescription],
    agent_tools: &[ToolDescription],
) -> String {
    format!(
        "You are an agent interacting with the tools from Coral Server and having your own tools. \
Your task is to perform any instructions coming from any agent.
Follow these steps in order:
1. Read the instruction in the mention you received.
2. Check only the list of tools available to you and pick the ones that fit the instruction.
3. Check the tool schema and make a plan in steps for the task you want to perform.
4. Only call the tools you need to perform for each step of the plan to complete the instruction.
5. Think about whether you have executed the instruction to the best of your ability with the tools.
6. Reply with your final answer as plain text; it will be sent back to the agent that mentioned you.

As you prepare your text response, use the following prompt to guide your responses:

{BASE_PROMPT}

These are the list of coral tools: {}
These are the list of your tools: {}",
        tools_description(coral_tools),
        tools_description(agent_tools),
    )
}

/// System prompt for one-shot use outside of Coral.
pub fn standalone_system_prompt(agent_tools: &[ToolDescription]) -> String {
    format!(
        "{BASE_PROMPT}\n\nThese are the list of your tools: {}",
        tools_description(agent_tools)
    )
}

/// User turn built from an inbound mention.
pub fn mention_input(mention: &Mention) -> String {
    format!(
        "Agent `{}` mentioned you in thread `{}` with the following instruction:\n\n{}",
        mention.sender_id, mention.thread_id, mention.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_tool() -> ToolDescription {
        ToolDescription {
            name: "tavily_search".into(),
            description: "Search the web".into(),
            parameters: Some(json!({"type": "object"})),
        }
    }

    #[test]
    fn renders_tool_schema_lines() {
        let rendered = tools_description(&[search_tool()]);
        assert_eq!(rendered, r#"Tool: tavily_search, Schema: {"type":"object"}"#);
    }

    #[test]
    fn coral_prompt_lists_both_tool_sets() {
        let coral = ToolDescription {
            name: "list_agents".into(),
            description: "List agents".into(),
            parameters: None,
        };
        let prompt = coral_system_prompt(&[coral], &[search_tool()]);
        assert!(prompt.contains("Tool: list_agents, Schema: {}"));
        assert!(prompt.contains("Tool: tavily_search"));
        assert!(prompt.contains("misinformation"));
    }

    #[test]
    fn mention_input_names_sender_and_thread() {
        let mention = Mention {
            thread_id: "t-1".into(),
            sender_id: "interface_agent".into(),
            content: "Is this photo real?".into(),
        };
        let input = mention_input(&mention);
        assert!(input.contains("interface_agent"));
        assert!(input.contains("t-1"));
        assert!(input.ends_with("Is this photo real?"));
    }
}
