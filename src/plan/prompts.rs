//! 各角色的 prompt 模板
//!
//! 每个模板末尾都附带输出格式要求，模型输出统一由 parser::decode 解析。

/// 规划 / 判定 / 重规划时展示给模型的工具清单（user_input 只在执行阶段提供）
pub const TOOL_CATALOG: &str = "\
- search_by_product: 用于获取视频素材,通过输入产品名称或产品类型，可获取视频素材，帮助生成视频广告内容。
- mixclip: 用于混剪视频素材，帮助生成视频广告内容。
- video_analysis: 用于分析视频内容，提取关键信息，以优化文案。";

const PLAN_FORMAT: &str = r#"只输出 JSON，格式：{"kind": "plan", "steps": ["步骤1", "步骤2", "..."]}"#;

pub fn planner_system(min_steps: usize, max_steps: usize) -> String {
    format!(
        "你是一个广告设计专家。
具备以下工具可以帮助你完成任务：
{TOOL_CATALOG}

根据给定的目标，请制定一个合理的执行步骤计划。请遵循以下要求：
1. 步骤数量：计划包含{min_steps}-{max_steps}个步骤，确保每个步骤都有明确的目的和必要性。
2. 工具使用：每个步骤必须明确指出使用哪些工具来完成任务，并详细说明工具的作用。
3. 任务推进：每个步骤应清晰描述如何推进任务，确保每个环节都能有效推动目标的实现。
4. 输入与输出：每个步骤都应明确输入和输出内容，确保流程的清晰性和可执行性。
5. 最终输出：最后一步应生成任务的最终答案或结果，确保目标得到有效达成。

{PLAN_FORMAT}"
    )
}

pub fn planner_user(objective: &str) -> String {
    format!("目标: {objective}")
}

pub fn judge_system(objective: &str, min_steps: usize, max_steps: usize) -> String {
    format!(
        r#"你是一个广告文案生成专家，专注于创作有吸引力且具有效果的广告文案。你具备以下工具可以帮助你完成任务：
{TOOL_CATALOG}
你需要首先判断给定的任务是否是单一任务（task）还是一个需要更复杂的执行计划（plan）。请根据以下目标进行判断和分析：
目标: {objective}
根据此目标，完成以下操作：
- 明确判断任务的性质（是task还是plan）。
- 如果是task，简洁明确地执行并返回任务结果。
- 如果是plan，列出{min_steps}-{max_steps}个执行步骤，每个步骤写明使用的工具、输入与输出。

只输出 JSON，格式二选一：
{{"kind": "task", "content": "任务结果；需要调用工具才能完成时留空"}}
{{"kind": "plan", "steps": ["步骤1", "步骤2", "..."]}}"#
    )
}

/// 计划中的一步
pub fn step_in_plan(objective: &str, past_steps: &str, plan: &str, task: &str) -> String {
    format!(
        "您的目标是：{objective}
您目前已完成以下步骤：
{past_steps}
目前的计划是：
{plan}
您的任务是执行以下任务：{task}"
    )
}

/// 独立的单一任务
pub fn standalone_task(task: &str) -> String {
    format!(
        "你是一个广告文案生成专家，专注于创作具有吸引力和效果的广告文案。你的任务是根据以下描述执行任务：
任务描述: {task}"
    )
}

/// 执行器 system prompt：角色说明 + 可用工具 + 调用格式
pub fn executor_system(tools: &str, call_schema: &str) -> String {
    format!(
        r#"你负责执行广告内容生产中的一个步骤。可以调用以下工具：
{tools}

需要调用工具时，只输出一个 JSON：{{"tool": "工具名", "args": {{...}}}}
调用格式的 JSON Schema：
{call_schema}

工具结果会以 "Observation from 工具名: ..." 的形式返回给你。
缺少必要信息（如产品名称、视频链接）时调用 user_input 向用户提问，不要编造。
步骤完成后直接输出该步骤的结果文本，不要再输出 JSON。"#
    )
}

pub fn replan_system(objective: &str, plan: &str, past_steps: &str) -> String {
    format!(
        r#"你的任务是根据当前执行情况和目标，判断是否还需要继续执行。仅向计划中添加仍需完成的步骤。不要将已完成的步骤作为计划的一部分返回。
您的目标是这样的：{objective}
您最初的计划是这样的：
{plan}
您目前已完成以下步骤：
{past_steps}
具备以下工具可以帮助你完成任务：
{TOOL_CATALOG}
仅向计划中添加仍需完成的步骤。不要将已完成的步骤作为计划的一部分返回。

只输出 JSON，格式二选一：
{{"kind": "plan", "steps": ["仍需完成的步骤", "..."]}}
{{"kind": "respond", "response": "目标已达成时给用户的最终结果"}}"#
    )
}

pub fn response_system(objective: &str, past_steps: &str) -> String {
    format!(
        "你的任务是总结用户的目标，并根据历史步骤与目标总结结果。
用户的目标是这样的：{objective}
用户的历史步骤是这样的：
{past_steps}
请总结结果，并返回一个简洁的总结。"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_embed_inputs() {
        assert!(planner_system(3, 5).contains("3-5个步骤"));
        assert!(judge_system("推广产品A", 3, 5).contains("目标: 推广产品A"));
        let s = step_in_plan("目标X", "1. a\n结果: ok", "1. a\n2. b", "b");
        assert!(s.contains("您的任务是执行以下任务：b"));
        assert!(replan_system("目标X", "1. a", "（无）").contains("\"kind\": \"respond\""));
        assert!(!TOOL_CATALOG.contains("user_input"));
    }
}
