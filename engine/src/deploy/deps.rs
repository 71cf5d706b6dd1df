//! Service dependency graph and startup ordering

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Sentinel resolving to every service
pub const ALL_SERVICES: &str = "all";

/// Service classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceClass {
    /// Required for a working instance
    Core,

    /// Deployed when the instance opts in
    Stretch,

    /// Observability and other extras
    Optional,
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceClass::Core => "core",
            ServiceClass::Stretch => "stretch",
            ServiceClass::Optional => "optional",
        };
        f.write_str(s)
    }
}

/// One node of the dependency graph
#[derive(Debug, Clone, Copy)]
pub struct ServiceSpec {
    pub name: &'static str,
    pub class: ServiceClass,
    pub depends_on: &'static [&'static str],
}

const fn service(
    name: &'static str,
    class: ServiceClass,
    depends_on: &'static [&'static str],
) -> ServiceSpec {
    ServiceSpec {
        name,
        class,
        depends_on,
    }
}

/// The federation stack, in declaration order
pub const SERVICE_GRAPH: &[ServiceSpec] = &[
    service("postgres", ServiceClass::Core, &[]),
    service("mongodb", ServiceClass::Core, &[]),
    service("redis", ServiceClass::Core, &[]),
    service("redis-blacklist", ServiceClass::Core, &[]),
    service("keycloak", ServiceClass::Core, &["postgres"]),
    service("opa", ServiceClass::Core, &[]),
    service("backend", ServiceClass::Core, &["postgres", "mongodb", "redis", "keycloak"]),
    service("frontend", ServiceClass::Core, &["backend"]),
    service("kas", ServiceClass::Stretch, &["mongodb", "backend"]),
    service("opal-server", ServiceClass::Stretch, &["opa"]),
    service("otel-collector", ServiceClass::Optional, &[]),
];

/// Resolves services into startup order
///
/// Construction validates the graph; a resolver that exists is acyclic and
/// has no dangling edges.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    services: Vec<ServiceSpec>,
    index: HashMap<&'static str, usize>,
}

impl DependencyResolver {
    /// Resolver over the built-in federation graph
    pub fn new() -> Result<Self, EngineError> {
        Self::from_specs(SERVICE_GRAPH)
    }

    /// Resolver over an arbitrary graph
    pub fn from_specs(specs: &[ServiceSpec]) -> Result<Self, EngineError> {
        let mut index = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name, i).is_some() {
                return Err(EngineError::ConfigError(format!(
                    "Service {} declared twice",
                    spec.name
                )));
            }
        }

        for spec in specs {
            for dep in spec.depends_on {
                if !index.contains_key(dep) {
                    return Err(EngineError::ConfigError(format!(
                        "Service {} depends on undeclared {}",
                        spec.name, dep
                    )));
                }
            }
        }

        let resolver = Self {
            services: specs.to_vec(),
            index,
        };
        resolver.check_acyclic()?;
        Ok(resolver)
    }

    fn check_acyclic(&self) -> Result<(), EngineError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            resolver: &DependencyResolver,
            i: usize,
            marks: &mut [Mark],
            path: &mut Vec<&'static str>,
        ) -> Result<(), EngineError> {
            let name = resolver.services[i].name;
            match marks[i] {
                Mark::Done => return Ok(()),
                Mark::Active => {
                    path.push(name);
                    let start = path.iter().position(|n| *n == name).unwrap_or(0);
                    return Err(EngineError::DependencyCycle(path[start..].join(" -> ")));
                }
                Mark::New => {}
            }

            marks[i] = Mark::Active;
            path.push(name);
            for dep in resolver.services[i].depends_on {
                visit(resolver, resolver.index[dep], marks, path)?;
            }
            path.pop();
            marks[i] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.services.len()];
        for i in 0..self.services.len() {
            visit(self, i, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<usize, EngineError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownService(name.to_string()))
    }

    // Post-order walk: every dependency lands before its dependent.
    fn push_order(&self, i: usize, seen: &mut HashSet<usize>, order: &mut Vec<usize>) {
        if !seen.insert(i) {
            return;
        }
        for dep in self.services[i].depends_on {
            self.push_order(self.index[dep], seen, order);
        }
        order.push(i);
    }

    fn names(&self, order: Vec<usize>) -> Vec<String> {
        order
            .into_iter()
            .map(|i| self.services[i].name.to_string())
            .collect()
    }

    /// Startup order for a service, the service itself last
    ///
    /// `"all"` yields a topological order of the whole graph.
    pub fn resolve(&self, service: &str) -> Result<Vec<String>, EngineError> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();

        if service == ALL_SERVICES {
            for i in 0..self.services.len() {
                self.push_order(i, &mut seen, &mut order);
            }
        } else {
            self.push_order(self.lookup(service)?, &mut seen, &mut order);
        }

        Ok(self.names(order))
    }

    /// Startup order for every service of a class plus what they need
    pub fn resolve_class(&self, class: ServiceClass) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for (i, spec) in self.services.iter().enumerate() {
            if spec.class == class {
                self.push_order(i, &mut seen, &mut order);
            }
        }
        self.names(order)
    }

    /// Startup order grouped into layers that can start concurrently
    ///
    /// Every service in layer `n` depends only on services in earlier layers.
    pub fn resolve_layers(&self, service: &str) -> Result<Vec<Vec<String>>, EngineError> {
        let order = self.resolve(service)?;

        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut layers: Vec<Vec<String>> = Vec::new();
        for name in &order {
            let spec = &self.services[self.lookup(name)?];
            let d = spec
                .depends_on
                .iter()
                .filter_map(|dep| depth.get(dep).map(|d| d + 1))
                .max()
                .unwrap_or(0);
            depth.insert(spec.name, d);
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(name.clone());
        }

        Ok(layers)
    }

    /// Class of a declared service
    pub fn class_of(&self, service: &str) -> Result<ServiceClass, EngineError> {
        Ok(self.services[self.lookup(service)?].class)
    }

    /// Every declared service name
    pub fn services(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.services.iter().map(|s| s.name)
    }
}
