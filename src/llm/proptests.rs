//! Property-based tests for the provider translation layer
//!
//! These tests verify that the translation between stored messages, our
//! internal types and the chat completions wire format preserves:
//! - Tool call count and order
//! - Tool result association by id
//! - Non-empty output for every translated message

#![allow(clippy::redundant_closure_for_method_calls)]

use super::openai::{
    self, OpenAIChoice, OpenAIFunctionCall, OpenAIMessage, OpenAIResponse, OpenAIToolCall,
    OpenAIUsage,
};
use super::types::{history_to_llm_messages, ContentBlock, LlmMessage, MessageRole};
use crate::db::{Message, ToolCall, ToolOutcome};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// Non-empty text block
fn arb_text_block() -> impl Strategy<Value = ContentBlock> {
    "[a-zA-Z0-9 _.!?,]{1,100}".prop_map(|text| ContentBlock::Text { text })
}

/// Tool use block with non-empty id/name and valid JSON input
fn arb_tool_use_block() -> impl Strategy<Value = ContentBlock> {
    ("[a-z0-9_]{5,20}", "[a-z_]{3,20}", arb_json_object())
        .prop_map(|(id, name, input)| ContentBlock::ToolUse { id, name, input })
}

/// Tool result block
fn arb_tool_result_block() -> impl Strategy<Value = ContentBlock> {
    ("[a-z0-9_]{5,20}", "[a-zA-Z0-9 _.!?,]{0,100}", any::<bool>()).prop_map(
        |(tool_use_id, content, is_error)| ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        },
    )
}

/// Small flat JSON object, the shape tool arguments take
fn arb_json_object() -> impl Strategy<Value = serde_json::Value> {
    proptest::collection::hash_map(
        "[a-z_]{1,10}",
        prop_oneof![
            (-1000i64..1000).prop_map(|n| serde_json::Value::Number(n.into())),
            "[a-zA-Z0-9 ]{0,30}".prop_map(serde_json::Value::String),
            any::<bool>().prop_map(serde_json::Value::Bool),
        ],
        0..5,
    )
    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect()))
}

fn arb_user_message() -> impl Strategy<Value = LlmMessage> {
    proptest::collection::vec(
        prop_oneof![3 => arb_text_block(), 2 => arb_tool_result_block()],
        1..6,
    )
    .prop_map(|content| LlmMessage {
        role: MessageRole::User,
        content,
    })
}

fn arb_assistant_message() -> impl Strategy<Value = LlmMessage> {
    proptest::collection::vec(
        prop_oneof![3 => arb_text_block(), 3 => arb_tool_use_block()],
        0..6,
    )
    .prop_map(|content| LlmMessage {
        role: MessageRole::Assistant,
        content,
    })
}

fn arb_message() -> impl Strategy<Value = LlmMessage> {
    prop_oneof![arb_user_message(), arb_assistant_message()]
}

/// A valid stored history: user turns, each followed by zero or more tool
/// rounds and a final answer. Call ids are unique across the history.
fn arb_history() -> impl Strategy<Value = Vec<Message>> {
    proptest::collection::vec(
        (
            "[a-zA-Z ?]{1,30}",
            proptest::collection::vec(1usize..4, 0..3),
            proptest::option::of("[a-zA-Z ]{1,30}"),
        ),
        1..4,
    )
    .prop_map(|turns| {
        let mut history = Vec::new();
        let mut next_id = 0usize;
        for (question, rounds, answer) in turns {
            history.push(Message::user(question));
            for calls_in_round in rounds {
                let calls: Vec<ToolCall> = (0..calls_in_round)
                    .map(|_| {
                        next_id += 1;
                        ToolCall::new(
                            format!("call_{next_id}"),
                            "calculator",
                            serde_json::json!({"a": next_id, "b": 1, "operation": "add"}),
                        )
                    })
                    .collect();
                history.push(Message::assistant_with_tools(None, calls.clone()));
                for call in &calls {
                    history.push(Message::tool_result(call, ToolOutcome::success(1)));
                }
            }
            history.push(Message::assistant_with_tools(answer, vec![]));
        }
        history
    })
}

fn make_openai_response(tool_calls: Vec<OpenAIToolCall>) -> OpenAIResponse {
    OpenAIResponse {
        choices: vec![OpenAIChoice {
            message: OpenAIMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(tool_calls),
                tool_call_id: None,
            },
            finish_reason: Some("tool_calls".to_string()),
        }],
        usage: Some(OpenAIUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        }),
    }
}

fn make_openai_tool_call(id: &str, name: &str, arguments: &str) -> OpenAIToolCall {
    OpenAIToolCall {
        id: id.to_string(),
        r#type: "function".to_string(),
        function: OpenAIFunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

// ============================================================================
// Response normalization
// ============================================================================

proptest! {
    /// N named tool calls in → N tool uses out, same order
    #[test]
    fn prop_normalize_preserves_tool_call_order(
        calls in proptest::collection::vec(("[a-z0-9]{5,15}", "[a-z_]{3,15}", arb_json_object()), 1..6),
    ) {
        let wire: Vec<_> = calls
            .iter()
            .map(|(id, name, args)| make_openai_tool_call(id, name, &args.to_string()))
            .collect();
        let normalized = openai::test_helpers::normalize_response(make_openai_response(wire)).unwrap();

        let uses = normalized.tool_uses();
        prop_assert_eq!(uses.len(), calls.len());
        for ((id, name, args), (got_id, got_name, got_args)) in calls.iter().zip(uses) {
            prop_assert_eq!(id.as_str(), got_id);
            prop_assert_eq!(name.as_str(), got_name);
            prop_assert_eq!(args, got_args);
        }
    }

    /// Tool calls without a name are dropped, the rest survive
    #[test]
    fn prop_normalize_drops_unnamed_tools(
        id in "[a-z0-9]{5,15}",
        name in "[a-z_]{3,15}",
    ) {
        let wire = vec![
            make_openai_tool_call("unnamed", "", "{}"),
            make_openai_tool_call(&id, &name, "{}"),
        ];
        let normalized = openai::test_helpers::normalize_response(make_openai_response(wire)).unwrap();
        let uses = normalized.tool_uses();
        prop_assert_eq!(uses.len(), 1);
        prop_assert_eq!(uses[0].1, name.as_str());
    }
}

// ============================================================================
// Message translation
// ============================================================================

proptest! {
    /// Any LlmMessage → at least one wire message
    #[test]
    fn prop_translate_never_empty_output(msg in arb_message()) {
        let result = openai::test_helpers::translate_message(&msg);
        prop_assert!(!result.is_empty(), "translate_message returned empty for {:?}", msg.role);
    }

    /// Every wire message has content, tool_calls or tool_call_id
    #[test]
    fn prop_translate_messages_have_content_or_tool_id(msg in arb_message()) {
        for m in &openai::test_helpers::translate_message(&msg) {
            prop_assert!(
                m.content.is_some() || m.tool_calls.is_some() || m.tool_call_id.is_some(),
                "wire message has neither content, tool_calls, nor tool_call_id: role={}",
                m.role,
            );
        }
    }

    /// Tool results become role "tool" messages, one per result, in order
    #[test]
    fn prop_translate_tool_results_become_tool_role(msg in arb_user_message()) {
        let expected: Vec<&str> = msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect();
        let translated = openai::test_helpers::translate_message(&msg);
        let got: Vec<&str> = translated
            .iter()
            .filter(|m| m.role == "tool")
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        prop_assert_eq!(got, expected);
    }
}

// ============================================================================
// Stored history conversion
// ============================================================================

proptest! {
    /// Every stored tool call and result survives conversion, in order
    #[test]
    fn prop_history_conversion_preserves_tool_traffic(history in arb_history()) {
        let expected_calls: Vec<String> = history
            .iter()
            .flat_map(|m| m.tool_calls().iter().map(|c| c.id.clone()))
            .collect();
        let expected_results: Vec<String> = history
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect();

        let converted = history_to_llm_messages(&history);
        let calls: Vec<String> = converted
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        let results: Vec<String> = converted
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect();

        prop_assert_eq!(calls, expected_calls);
        prop_assert_eq!(results, expected_results);
    }

    /// No two consecutive converted messages share the user role with
    /// tool results split across them
    #[test]
    fn prop_history_conversion_groups_results(history in arb_history()) {
        let converted = history_to_llm_messages(&history);
        for pair in converted.windows(2) {
            let both_results = pair.iter().all(|m| {
                m.role == MessageRole::User
                    && m.content.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. }))
            });
            prop_assert!(!both_results, "tool results were split across messages");
        }
    }
}
