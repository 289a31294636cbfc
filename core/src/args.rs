//! Command-line assembly for the two launch modes.

use crate::config::ModelConfig;
use crate::config::TaskCategory;

const HEADLESS_FLAGS: &[&str] = &[
    "--print",
    "--input-format",
    "stream-json",
    "--output-format",
    "stream-json",
    "--verbose",
    "--include-partial-messages",
];

/// Arguments for a headless process that speaks line-delimited JSON on
/// stdin/stdout and may only use the tools allowed for `category`.
pub fn dispatch_args(
    config: &ModelConfig,
    category: TaskCategory,
    prior_session_id: Option<&str>,
) -> Vec<String> {
    let mut args: Vec<String> = HEADLESS_FLAGS.iter().map(|flag| (*flag).to_string()).collect();
    push_model(&mut args, config);
    args.push("--allowedTools".to_string());
    args.push(config.tools.for_category(category).join(","));
    push_resume(&mut args, prior_session_id);
    args
}

/// Arguments for an interactive terminal session. No format or tool flags:
/// the session is unrestricted.
pub fn interact_args(config: &ModelConfig, prior_session_id: Option<&str>) -> Vec<String> {
    let mut args = Vec::new();
    push_model(&mut args, config);
    push_resume(&mut args, prior_session_id);
    args
}

fn push_model(args: &mut Vec<String>, config: &ModelConfig) {
    args.push("--model".to_string());
    args.push(config.model.clone());
}

fn push_resume(args: &mut Vec<String>, prior_session_id: Option<&str>) {
    if let Some(session_id) = prior_session_id {
        args.push("--resume".to_string());
        args.push(session_id.to_string());
    }
}
