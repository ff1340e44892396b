//! Side-by-side comparison: the same input sent to several generators at once.

use crate::error::CoreResult;
use crate::generator::{Generation, TextGenerator};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One generator's answer (or failure) for a comparison round.
#[derive(Debug)]
pub struct ComparisonOutcome {
    pub label: String,
    pub result: CoreResult<Generation>,
    pub elapsed: Duration,
}

impl ComparisonOutcome {
    /// Reply text, or the placeholder shown when the generator failed.
    pub fn display_text(&self) -> String {
        match &self.result {
            Ok(g) if !g.text.trim().is_empty() => g.text.clone(),
            Ok(_) => "No response".to_string(),
            Err(_) => "Error fetching response".to_string(),
        }
    }
}

/// Run every generator concurrently; outcomes keep the input order. One failure never hides the others.
pub async fn compare(input: &str, generators: &[Arc<dyn TextGenerator>]) -> Vec<ComparisonOutcome> {
    let runs = generators.iter().map(|generator| async move {
        let label = generator.label();
        let started = Instant::now();
        let result = generator.generate(input).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => info!(label = %label, ?elapsed, "Comparison reply"),
            Err(e) => warn!(label = %label, error = %e, "Comparison generator failed"),
        }
        ComparisonOutcome {
            label,
            result,
            elapsed,
        }
    });
    join_all(runs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use async_trait::async_trait;

    struct Fixed {
        label: &'static str,
        reply: Option<&'static str>,
        delay_ms: u64,
    }

    #[async_trait]
    impl TextGenerator for Fixed {
        fn label(&self) -> String {
            self.label.to_string()
        }

        async fn generate(&self, _input: &str) -> CoreResult<Generation> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            match self.reply {
                Some(text) => Ok(Generation::text(text)),
                None => Err(CoreError::Http {
                    status: 500,
                    message: "boom".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn keeps_order_and_failures() {
        let generators: Vec<Arc<dyn TextGenerator>> = vec![
            Arc::new(Fixed {
                label: "slow",
                reply: Some("fine-tuned"),
                delay_ms: 30,
            }),
            Arc::new(Fixed {
                label: "broken",
                reply: None,
                delay_ms: 0,
            }),
            Arc::new(Fixed {
                label: "quiet",
                reply: Some(""),
                delay_ms: 0,
            }),
        ];
        let outcomes = compare("who rules Regalia?", &generators).await;
        let labels: Vec<_> = outcomes.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["slow", "broken", "quiet"]);
        assert_eq!(outcomes[0].display_text(), "fine-tuned");
        assert_eq!(outcomes[1].display_text(), "Error fetching response");
        assert_eq!(outcomes[2].display_text(), "No response");
    }

    #[tokio::test]
    async fn runs_concurrently() {
        let generators: Vec<Arc<dyn TextGenerator>> = (0..3)
            .map(|_| {
                Arc::new(Fixed {
                    label: "g",
                    reply: Some("ok"),
                    delay_ms: 50,
                }) as Arc<dyn TextGenerator>
            })
            .collect();
        let started = Instant::now();
        compare("hi", &generators).await;
        assert!(started.elapsed() < Duration::from_millis(140));
    }
}
