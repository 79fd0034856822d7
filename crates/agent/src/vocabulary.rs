//! Tool vocabularies for the two loops.
//!
//! The orchestrator addresses elements by uid from accessibility snapshots;
//! the visual delegate addresses the page by normalized 0–1000 coordinates.
//! The two vocabularies are never mixed in one model call.

use serde_json::json;

use webpilot_providers::ToolDecl;

/// Terminal action: ends the orchestrator loop with a summary.
pub const COMPLETE_TASK: &str = "complete_task";

/// Hands a sub-task to the coordinate-based visual delegate.
pub const DELEGATE: &str = "delegate_to_visual_agent";

pub fn semantic_tools() -> Vec<ToolDecl> {
    vec![
        ToolDecl {
            name: "navigate",
            description: "Navigate the current page to a URL.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Absolute URL to open"}
                },
                "required": ["url"]
            }),
        },
        ToolDecl {
            name: "click",
            description: "Click an element identified by its uid from the latest snapshot.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": {"type": "string"},
                    "dbl_click": {"type": "boolean", "description": "Double-click instead of single click"}
                },
                "required": ["uid"]
            }),
        },
        ToolDecl {
            name: "hover",
            description: "Hover over an element identified by uid.",
            parameters: json!({
                "type": "object",
                "properties": {"uid": {"type": "string"}},
                "required": ["uid"]
            }),
        },
        ToolDecl {
            name: "fill",
            description: "Fill a form field identified by uid with a value.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": {"type": "string"},
                    "value": {"type": "string"}
                },
                "required": ["uid", "value"]
            }),
        },
        ToolDecl {
            name: "fill_form",
            description: "Fill several form fields in one call.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "elements": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "uid": {"type": "string"},
                                "value": {"type": "string"}
                            },
                            "required": ["uid", "value"]
                        }
                    }
                },
                "required": ["elements"]
            }),
        },
        ToolDecl {
            name: "upload_file",
            description: "Upload a local file through the file input identified by uid.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": {"type": "string"},
                    "file_path": {"type": "string"}
                },
                "required": ["uid", "file_path"]
            }),
        },
        ToolDecl {
            name: "get_element_text",
            description: "Read the text content of the element identified by uid.",
            parameters: json!({
                "type": "object",
                "properties": {"uid": {"type": "string"}},
                "required": ["uid"]
            }),
        },
        ToolDecl {
            name: "scroll_document",
            description: "Scroll the document by a pixel amount.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "direction": {"type": "string", "enum": ["up", "down", "left", "right"]},
                    "amount": {"type": "number", "description": "Pixels to scroll (default 500)"}
                },
                "required": ["direction"]
            }),
        },
        ToolDecl {
            name: "pagedown",
            description: "Scroll down by one viewport height.",
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolDecl {
            name: "pageup",
            description: "Scroll up by one viewport height.",
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolDecl {
            name: "take_snapshot",
            description: "Take a fresh accessibility snapshot of the current page. \
                          Element uids from older snapshots become stale after page changes.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "verbose": {"type": "boolean", "description": "Include non-interactive elements"}
                }
            }),
        },
        ToolDecl {
            name: "wait_for",
            description: "Wait until the given text appears on the page.",
            parameters: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        },
        ToolDecl {
            name: "handle_dialog",
            description: "Accept or dismiss a native browser dialog (alert/confirm/prompt).",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["accept", "dismiss"]},
                    "prompt_text": {"type": "string", "description": "Text to enter into a prompt dialog"}
                },
                "required": ["action"]
            }),
        },
        ToolDecl {
            name: "evaluate_script",
            description: "Run a JavaScript function in the page and return its result.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "function": {"type": "string", "description": "A JavaScript function expression"},
                    "args": {"type": "array", "description": "Arguments passed to the function"}
                },
                "required": ["function"]
            }),
        },
        ToolDecl {
            name: "press_key",
            description: "Press a keyboard key, e.g. 'Enter', 'Tab', 'Ctrl+a'.",
            parameters: json!({
                "type": "object",
                "properties": {"key": {"type": "string"}},
                "required": ["key"]
            }),
        },
        ToolDecl {
            name: "open_web_browser",
            description: "Bring the browser window to the foreground.",
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolDecl {
            name: COMPLETE_TASK,
            description: "Declare the task finished. Call this exactly once, when the task \
                          is done or cannot proceed, with a summary of the outcome.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "What was accomplished, or why the task could not be completed"}
                },
                "required": ["summary"]
            }),
        },
        ToolDecl {
            name: DELEGATE,
            description: "Delegate a sub-task that needs visual grounding (pixel-precise \
                          clicks, free-form drags, targets identified by appearance rather \
                          than structure) to the visual agent.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "instruction": {"type": "string", "description": "What the visual agent should do"}
                },
                "required": ["instruction"]
            }),
        },
    ]
}

pub fn visual_tools() -> Vec<ToolDecl> {
    let coords = |extra: serde_json::Value| {
        let mut properties = json!({
            "x": {"type": "number", "description": "X on a 0-1000 scale"},
            "y": {"type": "number", "description": "Y on a 0-1000 scale"}
        });
        if let (Some(base), Some(more)) = (properties.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                base.insert(k.clone(), v.clone());
            }
        }
        properties
    };

    vec![
        ToolDecl {
            name: "click_at",
            description: "Click at a normalized screen coordinate.",
            parameters: json!({
                "type": "object",
                "properties": coords(json!({})),
                "required": ["x", "y"]
            }),
        },
        ToolDecl {
            name: "type_text_at",
            description: "Click at a coordinate, then type text there.",
            parameters: json!({
                "type": "object",
                "properties": coords(json!({
                    "text": {"type": "string"},
                    "press_enter": {"type": "boolean"},
                    "clear_before_typing": {"type": "boolean"}
                })),
                "required": ["x", "y", "text"]
            }),
        },
        ToolDecl {
            name: "drag_and_drop",
            description: "Press at (x, y), drag to (dest_x, dest_y), and release.",
            parameters: json!({
                "type": "object",
                "properties": coords(json!({
                    "dest_x": {"type": "number"},
                    "dest_y": {"type": "number"}
                })),
                "required": ["x", "y", "dest_x", "dest_y"]
            }),
        },
        ToolDecl {
            name: "press_key",
            description: "Press a keyboard key, e.g. 'Enter', 'Tab', 'Ctrl+a'.",
            parameters: json!({
                "type": "object",
                "properties": {"key": {"type": "string"}},
                "required": ["key"]
            }),
        },
        ToolDecl {
            name: "scroll_document",
            description: "Scroll the document by a pixel amount.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "direction": {"type": "string", "enum": ["up", "down", "left", "right"]},
                    "amount": {"type": "number"}
                },
                "required": ["direction"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_vocabulary_complete() {
        let tools = semantic_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name).collect();
        for expected in [
            "navigate",
            "click",
            "fill",
            "fill_form",
            "take_snapshot",
            "scroll_document",
            "pagedown",
            "pageup",
            "evaluate_script",
            COMPLETE_TASK,
            DELEGATE,
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert_eq!(names.len(), 18);
    }

    #[test]
    fn test_visual_vocabulary_is_coordinate_only() {
        let tools = visual_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "click_at",
                "type_text_at",
                "drag_and_drop",
                "press_key",
                "scroll_document"
            ]
        );
        // No uid addressing in the visual vocabulary
        for tool in &tools {
            assert!(tool.parameters["properties"].get("uid").is_none());
        }
    }

    #[test]
    fn test_complete_task_requires_summary() {
        let tools = semantic_tools();
        let complete = tools.iter().find(|t| t.name == COMPLETE_TASK).unwrap();
        let required = complete.parameters["required"].as_array().unwrap();
        assert_eq!(required[0], "summary");
    }
}
