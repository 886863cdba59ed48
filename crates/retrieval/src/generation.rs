//! Answer generation from a rendered query context

use async_trait::async_trait;
use papergraph_common::{
    config::GenerationConfig,
    llm::{ChatClient, CompletionOptions},
    AppError, Result,
};
use std::sync::Arc;
use std::time::Duration;

use crate::context::QueryContext;

const GENERATION_SYSTEM_PROMPT: &str =
    "You answer research questions from a retrieved citation-graph context. \
    Only use the papers and relations you are given. If they are not enough, say so.";

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, context: &QueryContext) -> Result<String>;

    fn name(&self) -> &str;
}

/// Chat-completion backed generator
pub struct ChatGenerator {
    client: ChatClient,
    options: CompletionOptions,
}

impl ChatGenerator {
    pub fn new(client: ChatClient, max_tokens: u32, temperature: f32) -> Self {
        Self {
            client,
            options: CompletionOptions {
                max_tokens,
                temperature,
                json_mode: false,
            },
        }
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    async fn generate(&self, context: &QueryContext) -> Result<String> {
        self.client
            .complete(GENERATION_SYSTEM_PROMPT, &context.render_prompt(), &self.options)
            .await
    }

    fn name(&self) -> &str {
        self.client.model()
    }
}

/// Development generator: summarises the context without calling a model
#[derive(Debug, Default)]
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, context: &QueryContext) -> Result<String> {
        if context.is_empty() {
            return Ok(format!(
                "No papers in the graph match \"{}\". [Mock response - generation not configured]",
                context.query
            ));
        }

        let titles: Vec<&str> = context
            .anchors()
            .map(|n| n.paper.title.as_str())
            .collect();
        Ok(format!(
            "Based on {} retrieved papers and {} relations, the most relevant work on \"{}\" is: {}. \
            [Mock response - generation not configured]",
            context.nodes.len(),
            context.edges.len(),
            context.query,
            titles.join(", ")
        ))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    if !config.enabled {
        return Ok(Arc::new(EchoGenerator));
    }

    let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
        message: "generation.api_key is required when generation is enabled".to_string(),
    })?;
    let client = ChatClient::new(
        api_key,
        config.api_base.clone(),
        config.model.clone(),
        Duration::from_secs(config.timeout_secs),
    )?;
    Ok(Arc::new(ChatGenerator::new(
        client,
        config.max_tokens,
        config.temperature,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextNode, NodeOrigin};
    use papergraph_common::models::PaperNode;

    #[tokio::test]
    async fn test_echo_generator_names_anchors() {
        let mut context = QueryContext::empty("parameter-efficient tuning");
        context.nodes.push(ContextNode {
            paper: PaperNode::new("p1", "LoRA"),
            relevance_score: 0.9,
            origin: NodeOrigin::Anchor,
        });

        let answer = tokio_test::assert_ok!(EchoGenerator.generate(&context).await);
        assert!(answer.contains("LoRA"));
        assert!(answer.contains("1 retrieved papers"));
    }

    #[test]
    fn test_disabled_generation_falls_back_to_echo() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(generator.name(), "echo");
    }

    #[test]
    fn test_enabled_generation_requires_key() {
        let config = GenerationConfig {
            enabled: true,
            ..GenerationConfig::default()
        };
        assert!(matches!(
            create_generator(&config),
            Err(AppError::Configuration { .. })
        ));
    }
}
