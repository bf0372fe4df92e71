use crate::config::NarratorConfig;
use crate::narrator::ollama::OllamaNarrator;
use crate::narrator::{Narrator, OfflineNarrator};
use crate::types::NarratorKind;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct NarratorFactory {
    narrators: BTreeMap<NarratorKind, Arc<dyn Narrator>>,
}

impl NarratorFactory {
    pub fn with_defaults(cfg: &NarratorConfig) -> Self {
        let mut this = Self::default();
        this.register(Arc::new(OllamaNarrator::from_config(cfg)));
        this.register(Arc::new(OfflineNarrator));
        this
    }

    pub fn register(&mut self, narrator: Arc<dyn Narrator>) {
        self.narrators.insert(narrator.kind(), narrator);
    }

    pub fn get(&self, kind: NarratorKind) -> Option<Arc<dyn Narrator>> {
        self.narrators.get(&kind).cloned()
    }
}
