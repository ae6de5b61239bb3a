//! Module registry and factory.
//!
//! Maps kind names (`"osc"`, `"env"`, ...) to constructors so patches can be
//! described as data and instantiated inside a worker.
//!
//! ```rust
//! use tandem_core::ModuleRegistry;
//!
//! let registry = ModuleRegistry::new();
//! let osc = registry.create("osc", 48000.0).unwrap();
//! assert!(osc.is_generator());
//! assert!(registry.create("theremin", 48000.0).is_none());
//! ```

use crate::module::Module;
use crate::modules::{Envelope, Gain, LowPass, Oscillator};

/// Factory function type for creating modules.
pub type ModuleFactory = fn(f32) -> Box<dyn Module>;

/// Describes a module kind in the registry.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// Kind name used in patches and commands.
    pub kind: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Brief description.
    pub description: &'static str,
    /// True if the kind produces signal without input.
    pub generator: bool,
}

struct RegistryEntry {
    descriptor: ModuleDescriptor,
    factory: ModuleFactory,
}

/// Registry of module kinds.
pub struct ModuleRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// Creates a registry with the built-in modules.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(
            ModuleDescriptor {
                kind: "osc",
                name: "Oscillator",
                description: "Sine, saw and square oscillator",
                generator: true,
            },
            |sr| Box::new(Oscillator::new(sr)),
        );
        registry.register(
            ModuleDescriptor {
                kind: "env",
                name: "Envelope",
                description: "Gated ADSR envelope / VCA",
                generator: false,
            },
            |sr| Box::new(Envelope::new(sr)),
        );
        registry.register(
            ModuleDescriptor {
                kind: "filter",
                name: "Low Pass",
                description: "State-variable lowpass filter",
                generator: false,
            },
            |sr| Box::new(LowPass::new(sr)),
        );
        registry.register(
            ModuleDescriptor {
                kind: "gain",
                name: "Gain",
                description: "Smoothed gain stage",
                generator: false,
            },
            |sr| Box::new(Gain::new(sr)),
        );
        registry
    }

    /// Creates a registry with no kinds registered.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers a kind. A later registration replaces an earlier one.
    pub fn register(&mut self, descriptor: ModuleDescriptor, factory: ModuleFactory) {
        self.entries.retain(|e| e.descriptor.kind != descriptor.kind);
        self.entries.push(RegistryEntry {
            descriptor,
            factory,
        });
    }

    /// Instantiates a module of the given kind.
    pub fn create(&self, kind: &str, sample_rate: f32) -> Option<Box<dyn Module>> {
        self.entries
            .iter()
            .find(|e| e.descriptor.kind == kind)
            .map(|e| (e.factory)(sample_rate))
    }

    /// Looks up a descriptor.
    pub fn descriptor(&self, kind: &str) -> Option<&ModuleDescriptor> {
        self.entries
            .iter()
            .map(|e| &e.descriptor)
            .find(|d| d.kind == kind)
    }

    /// All registered descriptors.
    pub fn all(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ModuleRegistry::new();
        for kind in ["osc", "env", "filter", "gain"] {
            let module = registry.create(kind, 48000.0).unwrap();
            assert_eq!(module.kind(), kind);
            assert_eq!(
                registry.descriptor(kind).unwrap().generator,
                module.is_generator()
            );
        }
        assert_eq!(registry.all().count(), 4);
    }

    #[test]
    fn register_replaces_existing_kind() {
        let mut registry = ModuleRegistry::new();
        registry.register(
            ModuleDescriptor {
                kind: "osc",
                name: "Quiet",
                description: "",
                generator: false,
            },
            |sr| Box::new(Gain::new(sr)),
        );
        assert_eq!(registry.all().count(), 4);
        assert_eq!(registry.create("osc", 48000.0).unwrap().kind(), "gain");
    }
}
