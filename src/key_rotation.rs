use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::llm_providers::{
    Credential, GenerationEndpoint, ModelResolver, ProviderError,
};

// Import logging macros
use crate::log_llm_operation;

/// Ordered credentials; position is rotation priority
#[derive(Debug, Clone, Default)]
pub struct KeyPool {
    credentials: Vec<Credential>,
}

impl KeyPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }

    /// Parse a comma separated key list, skipping blanks and duplicates
    pub fn from_list(keys: &str) -> Self {
        let mut credentials: Vec<Credential> = Vec::new();
        for key in keys.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            let credential = Credential::new(key);
            if !credentials.contains(&credential) {
                credentials.push(credential);
            }
        }
        Self { credentials }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    Primary,
    Fallback,
}

/// A resolved endpoint for one credential. Replaced, never mutated, on rotation.
#[derive(Clone)]
pub struct ModelHandle {
    credential_index: usize,
    variant: ModelVariant,
    endpoint: Arc<dyn GenerationEndpoint>,
}

impl ModelHandle {
    pub fn credential_index(&self) -> usize {
        self.credential_index
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn model_name(&self) -> &str {
        self.endpoint.model_name()
    }

    pub async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError> {
        self.endpoint.generate_content(prompt).await
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("credential_index", &self.credential_index)
            .field("variant", &self.variant)
            .field("model", &self.model_name())
            .finish()
    }
}

/// How long a credential that resolved no model is skipped before it is tried again
pub const FAILED_RESOLUTION_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
enum HandleSlot {
    Ready(ModelHandle),
    Failed { at: Instant },
}

impl HandleSlot {
    fn handle(&self) -> Option<ModelHandle> {
        match self {
            HandleSlot::Ready(handle) => Some(handle.clone()),
            HandleSlot::Failed { .. } => None,
        }
    }

    /// A failed slot goes stale once the cooldown has passed
    fn is_fresh(&self) -> bool {
        match self {
            HandleSlot::Ready(_) => true,
            HandleSlot::Failed { at } => at.elapsed() < FAILED_RESOLUTION_COOLDOWN,
        }
    }
}

#[derive(Debug, Default)]
struct RotationState {
    current_index: usize,
    handles: HashMap<usize, HandleSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotationError {
    #[error("error is not a quota or rate-limit signal")]
    NotQuotaError,

    #[error("no alternate credential to rotate to")]
    NoAlternateCredential,

    #[error("credential #{index} could not resolve any model; all keys exhausted")]
    AllKeysExhausted { index: usize },
}

/// Process-wide owner of the key pool and per-credential model handles.
///
/// Construct once at startup and share behind an `Arc`. Concurrent requests
/// see the same current credential; two requests rotating on the same quota
/// signal may advance twice, which is tolerated. Index and cache updates happen
/// under one lock so a rotation is never observed half-applied. The current
/// index is mirrored in an atomic so readers never wait on that lock.
pub struct RotationManager {
    pool: KeyPool,
    resolver: Arc<dyn ModelResolver>,
    primary_model: String,
    fallback_model: String,
    state: Mutex<RotationState>,
    current: AtomicUsize,
    rotations: AtomicUsize,
}

impl RotationManager {
    pub fn new(
        pool: KeyPool,
        resolver: Arc<dyn ModelResolver>,
        primary_model: impl Into<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            resolver,
            primary_model: primary_model.into(),
            fallback_model: fallback_model.into(),
            state: Mutex::new(RotationState::default()),
            current: AtomicUsize::new(0),
            rotations: AtomicUsize::new(0),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Number of rotations performed since startup
    pub fn rotation_count(&self) -> usize {
        self.rotations.load(Ordering::Relaxed)
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Handle for the current credential, resolved lazily and cached.
    /// `None` when the credential could resolve neither model; that outcome is
    /// cached for `FAILED_RESOLUTION_COOLDOWN` before the credential is retried.
    ///
    /// Resolution runs with the state lock released; the first result written
    /// for an index wins.
    pub async fn current_handle(&self) -> Option<ModelHandle> {
        let index = {
            let state = self.state.lock().await;
            let index = state.current_index;
            if let Some(slot) = state.handles.get(&index).filter(|slot| slot.is_fresh()) {
                return slot.handle();
            }
            index
        };

        let resolved = self.resolve_slot(index).await;

        let mut state = self.state.lock().await;
        let slot = match state.handles.get(&index) {
            Some(existing) if existing.is_fresh() => existing.clone(),
            _ => {
                state.handles.insert(index, resolved.clone());
                resolved
            }
        };
        slot.handle()
    }

    /// Advance to the next credential after a quota signal and re-resolve its
    /// model. Advances one step per call; looping over the pool is the caller's
    /// decision.
    pub async fn rotate(&self, error: &ProviderError) -> Result<ModelHandle, RotationError> {
        if !error.is_quota() {
            return Err(RotationError::NotQuotaError);
        }
        if self.pool.len() <= 1 {
            debug!(pool_size = self.pool.len(), "Rotation skipped: no alternate credential");
            return Err(RotationError::NoAlternateCredential);
        }

        let mut state = self.state.lock().await;
        let from = state.current_index;
        let next = (from + 1) % self.pool.len();

        let slot = self.resolve_slot(next).await;
        state.current_index = next;
        state.handles.insert(next, slot.clone());
        self.current.store(next, Ordering::Release);
        self.rotations.fetch_add(1, Ordering::Relaxed);

        match slot {
            HandleSlot::Ready(handle) => {
                log_llm_operation!(rotate, from = from, to = next, model = Some(handle.model_name()));
                Ok(handle)
            }
            HandleSlot::Failed { .. } => {
                log_llm_operation!(rotate, from = from, to = next, model = None::<&str>);
                Err(RotationError::AllKeysExhausted { index: next })
            }
        }
    }

    /// Try the primary model, then the fallback
    async fn resolve_slot(&self, index: usize) -> HandleSlot {
        let Some(credential) = self.pool.get(index) else {
            return HandleSlot::Failed { at: Instant::now() };
        };

        for (variant, model) in [
            (ModelVariant::Primary, &self.primary_model),
            (ModelVariant::Fallback, &self.fallback_model),
        ] {
            match self.resolver.resolve(credential, model).await {
                Ok(endpoint) => {
                    debug!(
                        credential_index = index,
                        model = %model,
                        variant = ?variant,
                        "Resolved generation model"
                    );
                    return HandleSlot::Ready(ModelHandle {
                        credential_index: index,
                        variant,
                        endpoint,
                    });
                }
                Err(e) => {
                    warn!(
                        credential_index = index,
                        model = %model,
                        variant = ?variant,
                        error = %e,
                        "Model resolution failed"
                    );
                }
            }
        }

        HandleSlot::Failed { at: Instant::now() }
    }
}
