#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use study_assistant::{
    Credential, GenerationEndpoint, GenerationService, KeyPool, ModelResolver, ProviderError,
    RetryPolicy, RotationManager,
};

pub const PRIMARY: &str = "primary-model";
pub const FALLBACK: &str = "fallback-model";

/// Endpoint that replays a fixed script of outcomes, then repeats `fallback`
pub struct ScriptedEndpoint {
    model: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Result<String, ProviderError>,
    calls: AtomicUsize,
}

impl ScriptedEndpoint {
    pub fn new(
        model: &str,
        script: Vec<Result<String, ProviderError>>,
        fallback: Result<String, ProviderError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(model: &str, outcome: Result<String, ProviderError>) -> Arc<Self> {
        Self::new(model, Vec::new(), outcome)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationEndpoint for ScriptedEndpoint {
    async fn generate_content(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Resolves registered (key, model) pairs; anything else is a 404
#[derive(Default)]
pub struct ScriptedResolver {
    endpoints: HashMap<(String, String), Arc<ScriptedEndpoint>>,
    resolutions: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, endpoint: Arc<ScriptedEndpoint>) -> Self {
        self.endpoints
            .insert((key.to_string(), endpoint.model_name().to_string()), endpoint);
        self
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelResolver for ScriptedResolver {
    async fn resolve(
        &self,
        credential: &Credential,
        model: &str,
    ) -> Result<Arc<dyn GenerationEndpoint>, ProviderError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        match self
            .endpoints
            .get(&(credential.expose().to_string(), model.to_string()))
        {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Err(ProviderError::new(Some(404), format!("models/{} is not found", model))),
        }
    }
}

pub fn rotation_manager(
    keys: &str,
    resolver: impl Into<Arc<ScriptedResolver>>,
) -> Arc<RotationManager> {
    let resolver: Arc<ScriptedResolver> = resolver.into();
    Arc::new(RotationManager::new(
        KeyPool::from_list(keys),
        resolver,
        PRIMARY,
        FALLBACK,
    ))
}

pub fn generation_service(rotation: Arc<RotationManager>) -> GenerationService {
    GenerationService::new(rotation, RetryPolicy::default(), Duration::from_secs(180))
}

pub fn quota_error() -> ProviderError {
    ProviderError::new(
        Some(429),
        "Resource has been exhausted (e.g. check quota). (RESOURCE_EXHAUSTED)",
    )
}

pub fn unavailable_error() -> ProviderError {
    ProviderError::new(Some(503), "The model is overloaded. Please try again later. (UNAVAILABLE)")
}

pub fn flashcards_json(count: usize) -> String {
    let cards: Vec<_> = (1..=count)
        .map(|i| json!({ "question": format!("Question {}?", i), "answer": format!("Answer {}", i) }))
        .collect();
    serde_json::Value::Array(cards).to_string()
}

pub fn quiz_json(count: usize) -> String {
    let questions: Vec<_> = (1..=count)
        .map(|i| {
            json!({
                "question": format!("Quiz question {}?", i),
                "options": ["Alpha", "Beta", "Gamma", "Delta"],
                "correctAnswer": (i - 1) % 4
            })
        })
        .collect();
    serde_json::Value::Array(questions).to_string()
}
