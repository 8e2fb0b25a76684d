//! Mock model backends for testing
//!
//! Provides a scripted classifier and loader behind the runtime traits so
//! the engine and scheduler can be exercised without model weights.

#![allow(dead_code)]

use parking_lot::Mutex;
use sentinel_classifiers::{
    LoadedModel, ModelLoader, ModelRuntime, RuntimeHandle, SequenceClassifier, StaticDeviceProbe,
};
use sentinel_core::{DevicePreference, Error, ExecutionDevice, Result, ScoringConfig, Tokenize};
use sentinel_engine::ScoringEngine;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One token per whitespace-separated word
pub struct WhitespaceTokenizer;

impl Tokenize for WhitespaceTokenizer {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let mut spans = Vec::new();
        let mut start = None;
        for (idx, ch) in text.char_indices() {
            match (ch.is_whitespace(), start) {
                (false, None) => start = Some(idx),
                (true, Some(s)) => {
                    spans.push(s..idx);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push(s..text.len());
        }
        Ok(spans)
    }
}

/// Call history shared between a loader and the classifiers it creates
#[derive(Default)]
pub struct MockState {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MockState {
    /// Number of predict calls, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts from successful calls, in call order
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }

    /// Batch size of every call
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

/// Scores text by keyword; first matching rule wins
#[derive(Clone)]
struct Scoring {
    rules: Vec<(String, f32)>,
    default_score: f32,
    latency: Option<Duration>,
}

impl Scoring {
    fn score(&self, text: &str) -> f32 {
        self.rules
            .iter()
            .find(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, score)| *score)
            .unwrap_or(self.default_score)
    }
}

/// A configurable mock classifier
pub struct MockClassifier {
    state: Arc<MockState>,
    scoring: Scoring,
}

impl SequenceClassifier for MockClassifier {
    fn predict(&self, texts: &[String]) -> Result<Vec<f32>> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.batch_sizes.lock().push(texts.len());

        if let Some(latency) = self.scoring.latency {
            std::thread::sleep(latency);
        }

        let failing = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::inference("simulated out of memory"));
        }

        self.state.inputs.lock().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| self.scoring.score(t)).collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A configurable mock loader
pub struct MockLoader {
    dir: PathBuf,
    state: Arc<MockState>,
    scoring: Scoring,
    max_content_tokens: usize,
    missing: bool,
    loads: AtomicUsize,
}

impl MockLoader {
    /// Loader whose classifier scores every text 0.5
    pub fn new() -> Self {
        Self {
            dir: PathBuf::from("/models/AIGC_Model"),
            state: Arc::new(MockState::default()),
            scoring: Scoring {
                rules: Vec::new(),
                default_score: 0.5,
                latency: None,
            },
            max_content_tokens: 510,
            missing: false,
            loads: AtomicUsize::new(0),
        }
    }

    /// Score texts containing `keyword`
    pub fn with_rule(mut self, keyword: &str, score: f32) -> Self {
        self.scoring.rules.push((keyword.to_string(), score));
        self
    }

    /// Score for texts no rule matches
    pub fn with_default(mut self, score: f32) -> Self {
        self.scoring.default_score = score;
        self
    }

    /// Sleep this long in every predict call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.scoring.latency = Some(latency);
        self
    }

    /// Fail the next `n` predict calls
    pub fn failing_first(self, n: usize) -> Self {
        self.state.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Context limit reported by the loaded model
    pub fn with_max_content_tokens(mut self, tokens: usize) -> Self {
        self.max_content_tokens = tokens;
        self
    }

    /// Behave as if the model directory did not exist
    pub fn missing(mut self) -> Self {
        self.missing = true;
        self
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for MockLoader {
    fn validate(&self) -> Result<()> {
        if self.missing {
            return Err(Error::model_load(&self.dir, "model directory does not exist"));
        }
        Ok(())
    }

    fn load(&self, device: &ExecutionDevice) -> Result<LoadedModel> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(LoadedModel {
            classifier: Box::new(MockClassifier {
                state: Arc::clone(&self.state),
                scoring: self.scoring.clone(),
            }),
            tokenizer: Arc::new(WhitespaceTokenizer),
            device: device.clone(),
            max_content_tokens: self.max_content_tokens,
        })
    }

    fn model_dir(&self) -> &Path {
        &self.dir
    }
}

/// CPU-only configuration
pub fn cpu_config() -> ScoringConfig {
    ScoringConfig {
        device: DevicePreference::Cpu,
        ..Default::default()
    }
}

/// Runtime over a mock loader with no accelerators
pub fn runtime(loader: &Arc<MockLoader>, config: &ScoringConfig) -> RuntimeHandle {
    runtime_with_probe(loader, config, StaticDeviceProbe::none())
}

pub fn runtime_with_probe(
    loader: &Arc<MockLoader>,
    config: &ScoringConfig,
    probe: StaticDeviceProbe,
) -> RuntimeHandle {
    ModelRuntime::new(Arc::clone(loader) as Arc<dyn ModelLoader>, Arc::new(probe), config)
        .into_handle()
}

/// Engine over a mock loader
pub fn engine(loader: &Arc<MockLoader>, config: ScoringConfig) -> ScoringEngine {
    ScoringEngine::new(runtime(loader, &config), config).expect("valid config")
}

/// A paragraph of `n` copies of `word`
pub fn repeat_word(word: &str, n: usize) -> String {
    vec![word; n].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_classifier_rules() {
        let loader = MockLoader::new().with_rule("robot", 0.9).with_default(0.1);
        let model = loader.load(&ExecutionDevice::cpu()).unwrap();

        let scores = model
            .classifier
            .predict(&["a robot wrote this".to_string(), "a person did".to_string()])
            .unwrap();
        assert_eq!(scores, vec![0.9, 0.1]);
        assert_eq!(loader.state().calls(), 1);
        assert_eq!(loader.load_count(), 1);
    }

    #[test]
    fn test_mock_classifier_scripted_failures() {
        let loader = MockLoader::new().failing_first(1);
        let model = loader.load(&ExecutionDevice::cpu()).unwrap();
        let texts = vec!["x".to_string()];

        assert!(model.classifier.predict(&texts).is_err());
        assert!(model.classifier.predict(&texts).is_ok());
        assert_eq!(loader.state().inputs(), vec!["x".to_string()]);
    }

    #[test]
    fn test_whitespace_tokenizer() {
        let spans = WhitespaceTokenizer.token_spans("  one two\tthree ").unwrap();
        assert_eq!(spans, vec![2..5, 6..9, 10..15]);
    }
}
