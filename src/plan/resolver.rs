//! 步骤参数模板解析
//!
//! 语法只有一种 token：`{{stepId}}` 或 `{{stepId.field.path}}`，path 段为字段名或数组下标。
//! - 字符串恰好是一个 token 时，替换为被引用结果的原始 JSON 值（保留类型）
//! - token 嵌在更长的字符串里时，按文本插值（字符串不加引号，其它值按 JSON 序列化）
//! - 对象与数组递归处理；其它值原样保留
//!
//! 只能引用已成功步骤的结果，找不到即 Dependency 错误，由调用方只让该步骤失败。

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::AgentError;
use crate::plan::types::{ExecutionPlan, StepStatus};

static STEP_REF_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 模式编译失败时为 None，模板按纯文本处理
fn step_ref_re() -> Option<&'static Regex> {
    STEP_REF_RE
        .get_or_init(|| {
            Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+)((?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
                .map_err(|e| tracing::error!(error = %e, "step reference pattern rejected"))
                .ok()
        })
        .as_ref()
}

/// 模板中的一处引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReference {
    pub step_id: String,
    pub path: Vec<String>,
}

impl std::fmt::Display for StepReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.step_id)
        } else {
            write!(f, "{}.{}", self.step_id, self.path.join("."))
        }
    }
}

fn parse_reference(caps: &regex::Captures<'_>) -> StepReference {
    let step_id = caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string();
    let path = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    StepReference { step_id, path }
}

/// 列出模板中所有引用（按出现顺序，可能重复）
pub fn references(template: &Value) -> Vec<StepReference> {
    let mut out = Vec::new();
    collect_references(template, &mut out);
    out
}

fn collect_references(value: &Value, out: &mut Vec<StepReference>) {
    match value {
        Value::String(s) => {
            let Some(re) = step_ref_re() else { return };
            for caps in re.captures_iter(s) {
                out.push(parse_reference(&caps));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

/// 基于已成功步骤结果的解析器
pub struct ArgumentResolver<'a> {
    results: HashMap<&'a str, &'a Value>,
}

impl<'a> ArgumentResolver<'a> {
    /// 收集计划中所有 Succeeded 且有结果的步骤
    pub fn from_plan(plan: &'a ExecutionPlan) -> Self {
        let results = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .filter_map(|s| s.result.as_ref().map(|r| (s.id.as_str(), r)))
            .collect();
        Self { results }
    }

    pub fn from_results(results: HashMap<&'a str, &'a Value>) -> Self {
        Self { results }
    }

    pub fn resolve(&self, template: &Value) -> Result<Value, AgentError> {
        match template {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve(v)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_str(&self, s: &str) -> Result<Value, AgentError> {
        let Some(re) = step_ref_re() else {
            return Ok(Value::String(s.to_string()));
        };

        // 整串即一个 token：保留原始类型
        if let Some(caps) = re.captures(s) {
            if let Some(m) = caps.get(0) {
                if m.start() == 0 && m.end() == s.len() {
                    return self.lookup(&parse_reference(&caps)).cloned();
                }
            }
        } else {
            return Ok(Value::String(s.to_string()));
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in re.captures_iter(s) {
            let Some(m) = caps.get(0) else { continue };
            out.push_str(&s[last..m.start()]);
            match self.lookup(&parse_reference(&caps))? {
                Value::String(text) => out.push_str(text),
                other => out.push_str(&other.to_string()),
            }
            last = m.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    fn lookup(&self, reference: &StepReference) -> Result<&'a Value, AgentError> {
        let root = self.results.get(reference.step_id.as_str()).copied().ok_or_else(|| {
            AgentError::Dependency(format!(
                "unresolved reference '{reference}': step '{}' has no successful result",
                reference.step_id
            ))
        })?;
        let mut current: &'a Value = root;
        for segment in &reference.path {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| {
                AgentError::Dependency(format!(
                    "unresolved reference '{reference}': no field '{segment}'"
                ))
            })?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::PlanStep;
    use serde_json::json;

    #[test]
    fn test_reference_pattern_available() {
        let re = step_ref_re().expect("step reference pattern compiles");
        assert!(re.is_match("{{ fetch.body.items.0 }}"));
        assert!(!re.is_match("{{ }}"));
    }

    fn plan_with_results() -> ExecutionPlan {
        let mut plan = ExecutionPlan::new("g", "test");
        let mut fetch = PlanStep::new("fetch", "http_get", json!({}));
        fetch.status = StepStatus::Succeeded;
        fetch.result = Some(json!({"status": 200, "body": {"items": [{"name": "alpha"}, {"name": "beta"}]}}));
        let mut failed = PlanStep::new("broken", "x", json!({}));
        failed.status = StepStatus::Failed;
        failed.result = Some(json!("stale"));
        plan.steps = vec![fetch, failed];
        plan
    }

    #[test]
    fn test_whole_token_keeps_type() {
        let plan = plan_with_results();
        let r = ArgumentResolver::from_plan(&plan);
        assert_eq!(r.resolve(&json!("{{fetch.status}}")).unwrap(), json!(200));
        assert_eq!(
            r.resolve(&json!("{{ fetch.body.items.1 }}")).unwrap(),
            json!({"name": "beta"})
        );
    }

    #[test]
    fn test_embedded_token_interpolates() {
        let plan = plan_with_results();
        let r = ArgumentResolver::from_plan(&plan);
        let resolved = r
            .resolve(&json!({"text": "first={{fetch.body.items.0.name}} code={{fetch.status}}"}))
            .unwrap();
        assert_eq!(resolved, json!({"text": "first=alpha code=200"}));
    }

    #[test]
    fn test_whole_result_reference() {
        let plan = plan_with_results();
        let r = ArgumentResolver::from_plan(&plan);
        assert_eq!(r.resolve(&json!(["{{fetch}}"])).unwrap()[0]["status"], json!(200));
    }

    #[test]
    fn test_failed_step_not_resolvable() {
        let plan = plan_with_results();
        let r = ArgumentResolver::from_plan(&plan);
        let err = r.resolve(&json!("{{broken}}")).unwrap_err();
        assert!(matches!(err, AgentError::Dependency(_)));
    }

    #[test]
    fn test_missing_field_is_dependency_error() {
        let plan = plan_with_results();
        let r = ArgumentResolver::from_plan(&plan);
        let err = r.resolve(&json!("{{fetch.body.missing}}")).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_plain_values_untouched() {
        let plan = plan_with_results();
        let r = ArgumentResolver::from_plan(&plan);
        let template = json!({"n": 3, "flag": true, "s": "no tokens {here}"});
        assert_eq!(r.resolve(&template).unwrap(), template);
    }

    #[test]
    fn test_references_listed() {
        let refs = references(&json!({"a": "{{x.y}}", "b": ["{{z}} and {{x.k.0}}"]}));
        let rendered: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        assert!(rendered.contains(&"x.y".to_string()));
        assert!(rendered.contains(&"z".to_string()));
        assert!(rendered.contains(&"x.k.0".to_string()));
    }
}
