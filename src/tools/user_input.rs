//! user_input：向用户索取缺失信息
//!
//! 只在注册表中提供描述与 schema；执行器遇到该调用时转为中断，不会走到 execute。

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::capability::{Capability, UserInputArgs};
use crate::tools::schema::args_schema;
use crate::tools::Tool;

/// 中断提示文本
pub fn interrupt_value(ref_content: &str) -> String {
    format!("Please enter your input,ref:{ref_content} \n")
}

pub struct UserInputTool;

#[async_trait]
impl Tool for UserInputTool {
    fn name(&self) -> &str {
        Capability::USER_INPUT
    }

    fn description(&self) -> &str {
        "当缺少完成任务所必需的信息（如产品名称、视频链接）时向用户提问。输入: {\"ref_content\": \"需要用户补充的内容说明\"}。输出: 用户的回答。"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<UserInputArgs>()
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Err("user_input 只能在计划执行中使用".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_value_format() {
        assert_eq!(
            interrupt_value("产品名称"),
            "Please enter your input,ref:产品名称 \n"
        );
    }
}
