//! Parser for the tagged-block plan format the planning prompts ask for.
//!
//! ```text
//! <plan>
//! <goal>...</goal>
//! <execution_model>sequential|parallel|dag</execution_model>
//! <steps>
//! <step>
//! <id>local-id</id>
//! <action>ACTION_NAME</action>
//! <parameters>{"key":"value"}</parameters>
//! <dependencies>["local-id-1"]</dependencies>
//! <description>...</description>
//! </step>
//! </steps>
//! <estimated_duration>milliseconds</estimated_duration>
//! </plan>
//! ```
//!
//! Parsing is tolerant: malformed parameters become an empty map, malformed
//! dependency lists are read leniently, and steps without an action are
//! dropped. The only failure is a response with no usable step.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ActionStep, ExecutionModel};

static STEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<step>(.*?)</step>").expect("regex"));
static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<id>(.*?)</id>").expect("regex"));
static ACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<action>(.*?)</action>").expect("regex"));
static PARAMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<parameters>(.*?)</parameters>").expect("regex"));
static DEPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<dependencies>(.*?)</dependencies>").expect("regex"));
static DESCRIPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<description>(.*?)</description>").expect("regex"));
static GOAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<goal>(.*?)</goal>").expect("regex"));
static THOUGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<thought>(.*?)</thought>").expect("regex"));
static MODEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<execution_model>(.*?)</execution_model>").expect("regex"));
static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<estimated_duration>(.*?)</estimated_duration>").expect("regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response contains no <step> blocks")]
    NoSteps,

    #[error("none of the {0} <step> blocks named an action")]
    NoUsableSteps(usize),
}

/// Plan fields recovered from a model response. Step identifiers are fresh
/// and dependencies already point at them.
#[derive(Debug, Clone)]
pub struct ParsedPlan {
    pub goal: Option<String>,
    pub thought: Option<String>,
    pub execution_model: Option<ExecutionModel>,
    pub steps: Vec<ActionStep>,
    pub estimated_duration: Option<u64>,
}

fn tag(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_parameters(raw: Option<String>) -> HashMap<String, Value> {
    raw.and_then(|s| serde_json::from_str::<HashMap<String, Value>>(&s).ok())
        .unwrap_or_default()
}

/// JSON array of strings, or failing that a bracketed/comma separated list.
fn parse_dependency_list(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    if let Ok(list) = serde_json::from_str::<Vec<Value>>(&raw) {
        return list
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect();
    }
    raw.trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a planning or adaptation response.
///
/// Local step ids are remapped to fresh UUIDs; a dependency that names no
/// local step is dropped. The first step declaring a local id owns it.
pub fn parse_plan_response(response: &str) -> Result<ParsedPlan, ParseError> {
    let mut steps: Vec<ActionStep> = Vec::new();
    let mut id_map: HashMap<String, Uuid> = HashMap::new();
    let mut dep_strings: Vec<Vec<String>> = Vec::new();
    let mut blocks = 0usize;

    for cap in STEP_RE.captures_iter(response) {
        blocks += 1;
        let block = cap.get(1).map(|m| m.as_str()).unwrap_or("");

        let Some(action) = tag(&ACTION_RE, block) else {
            continue;
        };

        let mut step = ActionStep::new(action);
        if let Some(local_id) = tag(&ID_RE, block) {
            id_map.entry(local_id).or_insert(step.id);
        }
        step.parameters = parse_parameters(tag(&PARAMS_RE, block));
        step.description = tag(&DESCRIPTION_RE, block);

        dep_strings.push(parse_dependency_list(tag(&DEPS_RE, block)));
        steps.push(step);
    }

    if blocks == 0 {
        return Err(ParseError::NoSteps);
    }
    if steps.is_empty() {
        return Err(ParseError::NoUsableSteps(blocks));
    }

    for (step, deps) in steps.iter_mut().zip(dep_strings) {
        step.dependencies = deps.iter().filter_map(|d| id_map.get(d).copied()).collect();
    }

    Ok(ParsedPlan {
        goal: tag(&GOAL_RE, response),
        thought: tag(&THOUGHT_RE, response),
        execution_model: tag(&MODEL_RE, response).map(|m| ExecutionModel::from_tag(&m)),
        steps,
        estimated_duration: tag(&DURATION_RE, response).and_then(|d| {
            d.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .ok()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RESPONSE: &str = r#"
<plan>
<goal>Research and report</goal>
<execution_model>dag</execution_model>
<steps>
<step>
<id>step_1</id>
<action>SEARCH</action>
<parameters>{"query": "rust async"}</parameters>
<dependencies>[]</dependencies>
<description>Find sources</description>
</step>
<step>
<id>step_2</id>
<action>THINK</action>
<parameters>not json</parameters>
<dependencies>["step_1"]</dependencies>
</step>
<step>
<id>step_3</id>
<action>REPLY</action>
<dependencies>["step_2", "step_1", "ghost"]</dependencies>
</step>
</steps>
<estimated_duration>45000</estimated_duration>
</plan>"#;

    #[test]
    fn test_dependencies_are_remapped_in_order() {
        let parsed = parse_plan_response(RESPONSE).unwrap();
        assert_eq!(parsed.steps.len(), 3);

        let (s1, s2, s3) = (&parsed.steps[0], &parsed.steps[1], &parsed.steps[2]);
        assert!(s1.dependencies.is_empty());
        assert_eq!(s2.dependencies, vec![s1.id]);
        assert_eq!(s3.dependencies, vec![s2.id, s1.id]);
    }

    #[test]
    fn test_plan_level_fields() {
        let parsed = parse_plan_response(RESPONSE).unwrap();
        assert_eq!(parsed.goal.as_deref(), Some("Research and report"));
        assert_eq!(parsed.execution_model, Some(ExecutionModel::Dag));
        assert_eq!(parsed.estimated_duration, Some(45000));
        assert_eq!(parsed.steps[0].parameters["query"], "rust async");
        assert!(parsed.steps[1].parameters.is_empty());
        assert_eq!(parsed.steps[0].description.as_deref(), Some("Find sources"));
    }

    #[test]
    fn test_ids_are_fresh_per_parse() {
        let a = parse_plan_response(RESPONSE).unwrap();
        let b = parse_plan_response(RESPONSE).unwrap();
        assert_ne!(a.steps[0].id, b.steps[0].id);
    }

    #[test]
    fn test_no_steps_is_an_error() {
        assert_eq!(
            parse_plan_response("<plan><goal>x</goal></plan>").unwrap_err(),
            ParseError::NoSteps
        );
        assert_eq!(
            parse_plan_response("<step><id>a</id></step>").unwrap_err(),
            ParseError::NoUsableSteps(1)
        );
    }

    #[test]
    fn test_lenient_dependency_list() {
        assert_eq!(
            parse_dependency_list(Some("[step_1, 'step_2']".to_string())),
            vec!["step_1", "step_2"]
        );
        assert!(parse_dependency_list(Some("[]".to_string())).is_empty());
    }
}
