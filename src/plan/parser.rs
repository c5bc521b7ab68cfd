//! 模型输出解析
//!
//! 所有需要结构化结果的地方都走 decode：去掉 <think> 段与 Markdown 代码块，
//! 取出 JSON 块后按目标类型严格反序列化，失败统一为 AgentError::JsonParseError。

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::core::AgentError;

static THINK_RE: OnceLock<Option<Regex>> = OnceLock::new();
static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn strip_think(raw: &str) -> String {
    match THINK_RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok()) {
        Some(re) => re.replace_all(raw, "").into_owned(),
        None => raw.to_string(),
    }
}

/// 从模型输出中取出 JSON 块
///
/// 依次尝试：代码块内容、从每个 `{` / `[` 起的配平片段，返回第一个能解析为 JSON 的；
/// 都不合法时退回代码块或最外层片段，交给调用方报告解析错误。
pub fn extract_json_block(raw: &str) -> Option<String> {
    let text = strip_think(raw);
    let text = text.trim();

    let fenced = FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|inner| inner.starts_with('{') || inner.starts_with('['));
    if let Some(inner) = fenced {
        if is_json(inner) {
            return Some(inner.to_string());
        }
    }

    let mut from = 0;
    while let Some(offset) = text[from..].find(['{', '[']) {
        let start = from + offset;
        let Some(end) = balanced_end(text, start) else {
            break;
        };
        let candidate = &text[start..=end];
        if is_json(candidate) {
            return Some(candidate.to_string());
        }
        // 不合法的配平片段（如正文里的 "[结论]"）整体跳过，不再从其内部找起点
        from = end + 1;
    }

    fenced.map(str::to_string).or_else(|| outermost_span(text))
}

fn is_json(s: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(s).is_ok()
}

/// 从 start 处的括号起找到与之配平的结束位置（忽略字符串内的括号）
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn outermost_span(text: &str) -> Option<String> {
    let obj = text.find('{').zip(text.rfind('}'));
    let arr = text.find('[').zip(text.rfind(']'));
    let span = match (obj, arr) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };
    span.filter(|(start, end)| start < end)
        .map(|(start, end)| text[start..=end].to_string())
}

/// 严格解码为目标类型
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, AgentError> {
    let block = extract_json_block(raw)
        .ok_or_else(|| AgentError::JsonParseError(format!("no JSON found: {}", preview(raw))))?;
    serde_json::from_str(&block)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, preview(&block))))
}

/// 解析编号列表（"1. xxx" / "2) xxx" / "- xxx"），用于模型没有按 JSON 输出计划时
pub fn parse_numbered_steps(text: &str) -> Vec<String> {
    let text = strip_think(text);
    let mut steps = Vec::new();
    let mut in_list = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("1.") || trimmed.starts_with("1)") || trimmed.starts_with("1、") {
            in_list = true;
        }
        if in_list && (trimmed.starts_with(|c: char| c.is_ascii_digit()) || trimmed.starts_with("- ")) {
            let step = trimmed
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || c == '.' || c == ')' || c == '-' || c == '、'
                })
                .trim()
                .to_string();
            if !step.is_empty() {
                steps.push(step);
            }
        } else if in_list && trimmed.is_empty() && !steps.is_empty() {
            in_list = false;
        }
    }
    steps
}

/// 清理步骤列表：去空白、去空项、去重（保留首次出现的顺序）
pub fn normalize_steps(steps: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(steps.len());
    for step in steps {
        let step = step.trim().to_string();
        if !step.is_empty() && !out.contains(&step) {
            out.push(step);
        }
    }
    out
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Steps {
        steps: Vec<String>,
    }

    #[test]
    fn test_extract_from_fence_and_think() {
        let raw = "<think>先想一想 {不是json}</think>\n好的：\n```json\n{\"steps\": [\"a\", \"b\"]}\n```\n以上。";
        let v: Steps = decode(raw).unwrap();
        assert_eq!(v.steps, vec!["a", "b"]);
    }

    #[test]
    fn test_extract_bare_object_and_array() {
        assert_eq!(
            extract_json_block("结果是 {\"a\": 1} 。").as_deref(),
            Some("{\"a\": 1}")
        );
        assert_eq!(
            extract_json_block("[\"x\", {\"y\": 2}]").as_deref(),
            Some("[\"x\", {\"y\": 2}]")
        );
        assert!(extract_json_block("没有结构化内容").is_none());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = decode::<Steps>("{\"plan\": []}").unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
        assert!(matches!(decode::<Steps>("garbage"), Err(AgentError::JsonParseError(_))));
    }

    #[test]
    fn test_bracketed_prose_before_object() {
        let raw = "[结论] {\"kind\": \"plan\", \"steps\": [\"a\", \"b\"]}";
        assert_eq!(
            extract_json_block(raw).as_deref(),
            Some("{\"kind\": \"plan\", \"steps\": [\"a\", \"b\"]}")
        );

        let raw = "调用 [search_by_product]：{\"tool\": \"search_by_product\", \"args\": {\"product\": \"A\"}}";
        let block = extract_json_block(raw).unwrap();
        let v: serde_json::Value = serde_json::from_str(&block).unwrap();
        assert_eq!(v["tool"], "search_by_product");
        assert_eq!(v["args"]["product"], "A");
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let raw = "输出：{\"steps\": [\"查看 [素材] 列表\", \"b}\"]} 完毕";
        let v: Steps = decode(raw).unwrap();
        assert_eq!(v.steps, vec!["查看 [素材] 列表", "b}"]);
    }

    #[test]
    fn test_invalid_object_is_still_returned_for_error_reporting() {
        let raw = "{\"tool\": \"mixclip\" \"args\": {\"product_name\": \"A\"}}";
        let block = extract_json_block(raw).unwrap();
        assert!(block.starts_with("{\"tool\""));
        assert!(decode::<serde_json::Value>(raw).is_err());
    }

    #[test]
    fn test_parse_numbered_steps() {
        let text = "计划如下：\n1. 搜索产品A的视频\n2) 分析视频\n3、输出结论\n\n备注";
        assert_eq!(
            parse_numbered_steps(text),
            vec!["搜索产品A的视频", "分析视频", "输出结论"]
        );
        assert!(parse_numbered_steps("没有列表").is_empty());
    }

    #[test]
    fn test_normalize_steps() {
        let steps = vec![" a ".to_string(), "".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(normalize_steps(steps), vec!["a", "b"]);
    }
}
