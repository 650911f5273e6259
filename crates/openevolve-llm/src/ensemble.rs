use crate::client::ChatClient;
use crate::error::LlmError;
use crate::openai::{ModelSettings, OpenAiChatClient};
use crate::types::{ChatMessage, GenerateOptions};
use openevolve_config::LlmConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A weighted set of chat clients. Each `generate` call samples one
/// model by inverse-CDF lookup against a uniform draw and delegates to
/// it.
pub struct LlmEnsemble {
    clients: Vec<Arc<dyn ChatClient>>,
    /// Cumulative normalized weights, ending at 1.0.
    cumulative: Vec<f64>,
    rng: Mutex<StdRng>,
}

impl LlmEnsemble {
    /// Build from pre-constructed clients and raw weights.
    pub fn from_clients(
        clients: Vec<Arc<dyn ChatClient>>,
        weights: Vec<f64>,
        seed: Option<u64>,
    ) -> Result<Self, LlmError> {
        if clients.is_empty() || clients.len() != weights.len() {
            return Err(LlmError::EmptyEnsemble);
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(LlmError::ZeroWeight);
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for w in &weights {
            acc += w / total;
            cumulative.push(acc);
        }
        // Guard against rounding drift at the top end.
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            clients,
            cumulative,
            rng: Mutex::new(rng),
        })
    }

    /// Build OpenAI-compatible clients for every configured model.
    pub fn from_config(shared: &LlmConfig) -> Result<Self, LlmError> {
        Self::from_model_list(shared, &shared.models)
    }

    /// Build an ensemble over an explicit model list (e.g. the
    /// evaluator models) sharing `shared` transport settings.
    pub fn from_model_list(
        shared: &LlmConfig,
        models: &[openevolve_config::ModelConfig],
    ) -> Result<Self, LlmError> {
        let mut clients: Vec<Arc<dyn ChatClient>> = Vec::with_capacity(models.len());
        let mut weights = Vec::with_capacity(models.len());
        for model in models {
            let settings = ModelSettings::resolve(model, shared);
            weights.push(settings.weight);
            clients.push(Arc::new(OpenAiChatClient::new(settings)?));
        }
        Self::from_clients(clients, weights, shared.random_seed)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Sample a model index from the cumulative distribution.
    pub fn sample_index(&self) -> Result<usize, LlmError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| LlmError::Api("ensemble RNG lock poisoned".to_string()))?;
        let draw: f64 = rng.gen();
        Ok(self
            .cumulative
            .iter()
            .position(|&c| draw < c)
            .unwrap_or(self.clients.len() - 1))
    }

    /// Generate with one weighted-sampled model.
    pub async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let index = self.sample_index()?;
        let client = &self.clients[index];
        debug!(model = client.model_name(), "ensemble sampled model");
        client.generate(system, messages, options).await
    }

    /// Generate with every model in the ensemble, skipping failures.
    /// Used for evaluator feedback, where responses are averaged.
    pub async fn generate_all(
        &self,
        system: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Vec<String> {
        let mut responses = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            match client.generate(system, messages, options).await {
                Ok(text) => responses.push(text),
                Err(e) => debug!(model = client.model_name(), error = %e, "feedback model failed"),
            }
        }
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedChatClient;

    fn scripted(name: &str, reply: &str) -> Arc<dyn ChatClient> {
        Arc::new(ScriptedChatClient::single(name, reply))
    }

    #[test]
    fn empty_ensemble_rejected() {
        let result = LlmEnsemble::from_clients(vec![], vec![], None);
        assert!(matches!(result, Err(LlmError::EmptyEnsemble)));
    }

    #[test]
    fn zero_weight_rejected() {
        let result =
            LlmEnsemble::from_clients(vec![scripted("a", "x")], vec![0.0], None);
        assert!(matches!(result, Err(LlmError::ZeroWeight)));
    }

    #[test]
    fn weights_normalized() {
        let ensemble = LlmEnsemble::from_clients(
            vec![scripted("a", "x"), scripted("b", "y")],
            vec![2.0, 6.0],
            Some(1),
        )
        .unwrap();
        assert!((ensemble.cumulative[0] - 0.25).abs() < 1e-9);
        assert_eq!(ensemble.cumulative[1], 1.0);
    }

    #[test]
    fn sampling_frequencies_converge_to_weights() {
        let ensemble = LlmEnsemble::from_clients(
            vec![scripted("a", "x"), scripted("b", "y")],
            vec![1.0, 3.0],
            Some(7),
        )
        .unwrap();
        let mut counts = [0usize; 2];
        let draws = 20_000;
        for _ in 0..draws {
            counts[ensemble.sample_index().unwrap()] += 1;
        }
        let freq_b = counts[1] as f64 / draws as f64;
        assert!((freq_b - 0.75).abs() < 0.02, "freq_b = {}", freq_b);
    }

    #[tokio::test]
    async fn generate_delegates_to_sampled_model() {
        let ensemble = LlmEnsemble::from_clients(
            vec![scripted("only", "the reply")],
            vec![1.0],
            Some(1),
        )
        .unwrap();
        let text = ensemble
            .generate("sys", &[ChatMessage::user("hi")], &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "the reply");
    }

    #[tokio::test]
    async fn generate_all_collects_every_model() {
        let ensemble = LlmEnsemble::from_clients(
            vec![scripted("a", "one"), scripted("b", "two")],
            vec![1.0, 1.0],
            Some(1),
        )
        .unwrap();
        let replies = ensemble
            .generate_all("", &[], &GenerateOptions::default())
            .await;
        assert_eq!(replies, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn generate_all_skips_failures() {
        let ensemble = LlmEnsemble::from_clients(
            vec![Arc::new(crate::client::FailingChatClient), scripted("b", "two")],
            vec![1.0, 1.0],
            Some(1),
        )
        .unwrap();
        let replies = ensemble
            .generate_all("", &[], &GenerateOptions::default())
            .await;
        assert_eq!(replies, vec!["two".to_string()]);
    }
}
