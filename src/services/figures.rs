use rand::seq::SliceRandom;
use std::collections::BTreeMap;

/// Immutable historical-figure lookup, built once at startup and injected
/// into the orchestrator.
pub struct FigureCatalog {
    figures: BTreeMap<String, String>,
}

impl FigureCatalog {
    /// Catalog shipped with the binary.
    pub fn builtin() -> Self {
        let figures: BTreeMap<String, String> =
            serde_json::from_str(include_str!("../../data/historical_figures.json"))
                .expect("embedded figure catalog is valid JSON");
        Self { figures }
    }

    /// Load a catalog from a JSON file of `name -> portrait URL`.
    pub fn from_path(path: &str) -> Result<Self, FigureCatalogError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FigureCatalogError::Io(path.to_string(), e))?;
        let figures: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        if figures.is_empty() {
            return Err(FigureCatalogError::Empty(path.to_string()));
        }
        Ok(Self { figures })
    }

    pub fn portrait_url(&self, name: &str) -> Option<&str> {
        self.figures.get(name).map(String::as_str)
    }

    /// Pick a random figure `(name, portrait URL)`.
    pub fn random(&self) -> (&str, &str) {
        let names: Vec<&String> = self.figures.keys().collect();
        let name = names
            .choose(&mut rand::thread_rng())
            .expect("catalog is never empty");
        (name.as_str(), self.figures[*name].as_str())
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FigureCatalogError {
    #[error("failed to read figure catalog {0}: {1}")]
    Io(String, std::io::Error),

    #[error("figure catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("figure catalog {0} is empty")]
    Empty(String),
}
