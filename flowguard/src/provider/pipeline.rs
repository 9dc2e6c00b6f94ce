//! Short prompt pipelines: each step's output is the next step's input.

use super::{CompletionProvider, GuardedProvider};
use crate::batch::{process_batch_settled, BatchOptions};
use crate::errors::{ResilienceError, ResilienceResult};
use crate::events::CallContext;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{info, warn};

static INPUT_PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\s*input\s*\}"));

fn placeholder() -> ResilienceResult<&'static Regex> {
    INPUT_PLACEHOLDER
        .as_ref()
        .map_err(|e| ResilienceError::Config(format!("invalid placeholder pattern: {e}")))
}

/// One prompt template in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step name, used in logs.
    pub name: String,
    /// Prompt template. `{input}` is replaced by the step input.
    pub template: String,
}

impl PipelineStep {
    /// Creates a step.
    #[must_use]
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Renders the prompt for `input`.
    ///
    /// A template without a placeholder gets the input appended after a
    /// blank line.
    pub fn render(&self, input: &str) -> ResilienceResult<String> {
        let re = placeholder()?;
        if re.is_match(&self.template) {
            Ok(re
                .replace_all(&self.template, regex::NoExpand(input))
                .into_owned())
        } else {
            Ok(format!("{}\n\n{input}", self.template))
        }
    }
}

/// Output of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Step name.
    pub step: String,
    /// Rendered prompt sent to the provider.
    pub prompt: String,
    /// Provider output.
    pub output: String,
}

/// Runs `steps` in order, feeding each output into the next step.
///
/// Stops at the first failed step.
pub async fn run_pipeline<P: CompletionProvider>(
    provider: &GuardedProvider<P>,
    steps: &[PipelineStep],
    input: &str,
) -> ResilienceResult<Vec<StepOutput>> {
    if steps.is_empty() {
        return Err(ResilienceError::Config("pipeline has no steps".to_string()));
    }

    let mut outputs: Vec<StepOutput> = Vec::with_capacity(steps.len());
    let mut current = input.to_string();

    for (index, step) in steps.iter().enumerate() {
        let prompt = step.render(&current)?;
        let ctx = CallContext::new("pipeline.step")
            .with_attribute("step", step.name.as_str())
            .with_attribute("step_index", index)
            .with_attribute("provider", provider.inner().name());

        let output = match provider.complete_with(&prompt, &ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!(step = %step.name, step_index = index, error = %e, "Pipeline step failed");
                return Err(e);
            }
        };

        info!(step = %step.name, step_index = index, output_chars = output.chars().count(), "Pipeline step completed");
        current.clone_from(&output);
        outputs.push(StepOutput {
            step: step.name.clone(),
            prompt,
            output,
        });
    }

    Ok(outputs)
}

/// Runs the pipeline for every input; one failed input does not stop the
/// others.
pub async fn run_pipeline_batch<P: CompletionProvider>(
    provider: &GuardedProvider<P>,
    steps: &[PipelineStep],
    inputs: Vec<String>,
    options: &BatchOptions,
) -> ResilienceResult<Vec<ResilienceResult<Vec<StepOutput>>>> {
    process_batch_settled(
        inputs,
        move |input: String| async move { run_pipeline(provider, steps, &input).await },
        options,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use crate::errors::OperationError;
    use crate::guard::CallGuard;
    use crate::provider::MockCompletionProvider;
    use crate::retry::RetryPolicy;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn guarded(mock: MockCompletionProvider) -> GuardedProvider<MockCompletionProvider> {
        let breaker = CircuitBreaker::new(10, Duration::from_secs(60), 1).named("mock-llm");
        let guard = CallGuard::new(Arc::new(breaker)).with_retry(
            RetryPolicy::new()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(5))
                .with_jitter(Duration::ZERO),
        );
        GuardedProvider::new(mock, guard)
    }

    fn echo_mock() -> MockCompletionProvider {
        let mut mock = MockCompletionProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete().returning(|prompt| Ok(format!("<{prompt}>")));
        mock
    }

    #[test]
    fn test_render() {
        let step = PipelineStep::new("summarize", "Summarize: { input }!");
        assert_eq!(step.render("text $1").ok().as_deref(), Some("Summarize: text $1!"));

        let bare = PipelineStep::new("raw", "Translate to French.");
        assert_eq!(
            bare.render("hello").ok().as_deref(),
            Some("Translate to French.\n\nhello")
        );
    }

    #[tokio::test]
    async fn test_steps_chain_outputs() {
        let provider = guarded(echo_mock());
        let steps = vec![
            PipelineStep::new("first", "A({input})"),
            PipelineStep::new("second", "B({input})"),
        ];

        let outputs = run_pipeline(&provider, &steps, "x").await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].prompt, "A(x)");
        assert_eq!(outputs[0].output, "<A(x)>");
        assert_eq!(outputs[1].prompt, "B(<A(x)>)");
        assert_eq!(outputs[1].output, "<B(<A(x)>)>");
    }

    #[tokio::test]
    async fn test_empty_pipeline_rejected() {
        let provider = guarded(echo_mock());
        let result = run_pipeline(&provider, &[], "x").await;
        assert!(matches!(result, Err(ResilienceError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_stops_pipeline() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete().returning(|prompt| {
            if prompt.starts_with("B") {
                Err(OperationError::fatal("content policy"))
            } else {
                Ok(prompt.to_string())
            }
        });
        let provider = guarded(mock);
        let steps = vec![
            PipelineStep::new("first", "A {input}"),
            PipelineStep::new("second", "B {input}"),
            PipelineStep::new("third", "C {input}"),
        ];

        let result = run_pipeline(&provider, &steps, "x").await;
        assert!(result.err().is_some_and(|e| e.to_string() == "content policy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_settles_each_input() {
        let mut mock = MockCompletionProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete().returning(|prompt| {
            if prompt.contains("bad") {
                Err(OperationError::fatal("rejected"))
            } else {
                Ok(prompt.to_uppercase())
            }
        });
        let provider = guarded(mock);
        let steps = vec![PipelineStep::new("upper", "{input}")];

        let progress = Arc::new(Mutex::new(Vec::new()));
        let p = progress.clone();
        let options = BatchOptions::new()
            .with_concurrency(2)
            .on_progress(move |done, total| p.lock().push((done, total)));

        let results = run_pipeline_batch(
            &provider,
            &steps,
            vec!["a".to_string(), "bad".to_string(), "c".to_string()],
            &options,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().map(|o| o[0].output.clone()).ok(), Some("A".to_string()));
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().map(|o| o[0].output.clone()).ok(), Some("C".to_string()));
        assert_eq!(*progress.lock(), vec![(1, 3), (2, 3), (3, 3)]);
    }
}
