use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::DetectedObject;

use super::backend::DetectorBackend;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect`
/// takes `&mut self`. The same mutex keeps concurrent uploads from
/// running more than one inference at a time.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn DetectorBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Run person detection with the default backend.
    ///
    /// Non-person detections are filtered out here so callers only ever
    /// see the class the presence tracker acts on.
    pub fn detect_persons(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedObject>> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        let mut objects = guard.detect(pixels, width, height)?;
        objects.retain(|obj| obj.is_person());
        Ok(objects)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, DetectedObject, PERSON_CLASS_ID};

    struct FixedBackend {
        objects: Vec<DetectedObject>,
    }

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<DetectedObject>> {
            Ok(self.objects.clone())
        }
    }

    fn object(class_id: u32) -> DetectedObject {
        DetectedObject {
            class_id,
            confidence: 0.9,
            bbox: BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
        }
    }

    #[test]
    fn detect_persons_drops_other_classes() {
        let mut registry = BackendRegistry::new();
        registry.register(FixedBackend {
            objects: vec![object(PERSON_CLASS_ID), object(2), object(PERSON_CLASS_ID)],
        });

        let persons = registry.detect_persons(&[0u8; 12], 2, 2).unwrap();
        assert_eq!(persons.len(), 2);
        assert!(persons.iter().all(|obj| obj.is_person()));
    }

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(FixedBackend { objects: vec![] });
        assert!(registry.default_backend().is_some());
        assert_eq!(registry.list(), vec!["fixed".to_string()]);
    }

    #[test]
    fn detect_without_backend_fails() {
        let registry = BackendRegistry::new();
        assert!(registry.detect_persons(&[], 0, 0).is_err());
    }
}
