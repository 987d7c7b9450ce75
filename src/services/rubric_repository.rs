use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::models::{Aspect, Category, RawRubric, Rubric};
use crate::services::backend::ScoringBackend;
use crate::services::sequencer::RequestSequencer;

const DEFAULT_RUBRIC_JSON: &str = include_str!("../../assets/default_rubric.json");

/// Loads rubrics per form, memoizing successful loads and falling back to an offline default
/// when the backend cannot deliver.
pub struct RubricRepository {
    backend: Arc<dyn ScoringBackend>,
    cache: Mutex<HashMap<String, Arc<Rubric>>>,
    sequencer: RequestSequencer,
    fallback: Arc<Rubric>,
}

impl RubricRepository {
    pub fn new(backend: Arc<dyn ScoringBackend>) -> Self {
        Self::with_fallback(backend, default_rubric())
    }

    pub fn with_fallback(backend: Arc<dyn ScoringBackend>, fallback: Rubric) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
            sequencer: RequestSequencer::new(),
            fallback: Arc::new(fallback),
        }
    }

    pub fn cached(&self, form_id: &str) -> Option<Arc<Rubric>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(form_id)
            .cloned()
    }

    pub fn fallback(&self) -> Arc<Rubric> {
        Arc::clone(&self.fallback)
    }

    /// Never fails: transport errors yield the fallback rubric, which is not memoized so a
    /// later selection of the same form tries the backend again.
    pub async fn load(&self, form_id: &str) -> Arc<Rubric> {
        if let Some(rubric) = self.cached(form_id) {
            debug!("Rubric cache hit for form {}", form_id);
            return rubric;
        }

        let ticket = self.sequencer.begin(form_id);
        let raw = match self.backend.get_rubric(form_id).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Using offline rubric for form {}: {}", form_id, err);
                return self.fallback();
            }
        };

        let rubric = Arc::new(normalize_rubric(raw, form_id));
        if !self.sequencer.complete(&ticket) {
            // A newer load already landed; prefer what it cached.
            return self.cached(form_id).unwrap_or(rubric);
        }

        info!(
            "Loaded rubric {} ({} categories, {} aspects)",
            rubric.id,
            rubric.categories.len(),
            rubric.aspects().count()
        );
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(form_id.to_string(), Arc::clone(&rubric));
        rubric
    }
}

/// Converts a remote rubric into the strict internal shape. Aspects without an id are dropped;
/// missing names get placeholders.
pub fn normalize_rubric(raw: RawRubric, form_id: &str) -> Rubric {
    let id = if raw.id.is_empty() {
        form_id.to_string()
    } else {
        raw.id
    };

    let categories = raw
        .categories
        .into_iter()
        .enumerate()
        .map(|(index, category)| Category {
            name: category
                .name
                .unwrap_or_else(|| format!("Kategori {}", index + 1)),
            aspects: category
                .aspects
                .into_iter()
                .filter_map(|aspect| {
                    if aspect.id.is_empty() {
                        warn!("Dropping aspect without id from rubric {}", id);
                        return None;
                    }
                    let bands = aspect.aspect_score.normalize(aspect.max_score);
                    Some(Aspect {
                        label: aspect.name.unwrap_or_else(|| aspect.id.clone()),
                        id: aspect.id,
                        max_score: aspect.max_score,
                        bands,
                    })
                })
                .collect(),
        })
        .collect();

    Rubric {
        name: raw.name.unwrap_or_else(|| id.clone()),
        id,
        categories,
    }
}

/// The rubric compiled into the binary for offline use.
pub fn default_rubric() -> Rubric {
    match serde_json::from_str::<RawRubric>(DEFAULT_RUBRIC_JSON) {
        Ok(raw) => normalize_rubric(raw, "default"),
        Err(err) => {
            error!("Embedded default rubric is malformed: {err}");
            Rubric {
                id: "default".to_string(),
                name: "default".to_string(),
                categories: Vec::new(),
            }
        }
    }
}

/// Reads a replacement offline rubric, falling back to the embedded one when unreadable.
pub fn load_fallback_rubric(path: Option<&Path>) -> Rubric {
    let Some(path) = path else {
        return default_rubric();
    };
    let parsed = fs::read_to_string(path)
        .map_err(|err| err.to_string())
        .and_then(|raw| serde_json::from_str::<RawRubric>(&raw).map_err(|err| err.to_string()));
    match parsed {
        Ok(raw) => {
            info!("Using offline rubric from {}", path.display());
            normalize_rubric(raw, "default")
        }
        Err(err) => {
            warn!(
                "Failed to load offline rubric {}, using the built-in one: {}",
                path.display(),
                err
            );
            default_rubric()
        }
    }
}
