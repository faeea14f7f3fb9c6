//! Abstraction over the external provisioning engine.
//!
//! The coordinator never diffs, plans, or stores infrastructure state itself;
//! it selects stacks, sets their configuration, and asks the engine to run
//! `up`, `refresh`, or `destroy`. Implementations stream progress to an
//! [`OutputSink`] and report the stack outputs afterwards.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use serde_json::Value;

use crate::output::OutputSink;

/// One independently deployable group of infrastructure resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningUnit {
    /// Logical name used in logs and errors (for example `network`).
    pub name: String,
    /// Directory holding the unit's program and project file.
    pub work_dir: Utf8PathBuf,
}

impl ProvisioningUnit {
    /// Creates a unit from its logical name and working directory.
    #[must_use]
    pub fn new(name: impl Into<String>, work_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            work_dir: work_dir.into(),
        }
    }
}

/// A stack selected within a unit's workspace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackRef {
    /// Unit the stack belongs to.
    pub unit: ProvisioningUnit,
    /// Stack name (for example `dev`).
    pub name: String,
}

/// A single configuration entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigValue {
    /// Plain-text value.
    pub value: String,
    /// Whether the engine must store the value encrypted.
    pub secret: bool,
}

impl ConfigValue {
    /// Builds a plain-text entry.
    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    /// Builds an entry the engine stores as a secret.
    #[must_use]
    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }
}

/// Ordered configuration for a stack keyed by `namespace:key`.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// A single stack output.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputValue {
    /// Output value as reported by the engine.
    pub value: Value,
    /// Whether the engine marks the value as secret.
    pub secret: bool,
}

/// Outputs exported by a stack after an operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StackOutputs(BTreeMap<String, OutputValue>);

impl StackOutputs {
    /// Creates an empty output set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an output.
    pub fn insert(&mut self, name: impl Into<String>, value: OutputValue) {
        self.0.insert(name.into(), value);
    }

    /// Returns the output called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.0.get(name)
    }

    /// Returns the output as a string, treating absent, `null`, and empty
    /// values alike as missing. Numbers and booleans are rendered as text.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<String> {
        let rendered = match &self.get(name)?.value {
            Value::Null => return None,
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        if rendered.is_empty() {
            None
        } else {
            Some(rendered)
        }
    }

    /// Number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the stack exports nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, OutputValue)> for StackOutputs {
    fn from_iter<I: IntoIterator<Item = (K, OutputValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Future returned by engine operations.
pub type EngineFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations the coordinator needs from a provisioning engine.
pub trait Engine: Send + Sync {
    /// Engine specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Selects `stack_name` in the unit's workspace, creating it if absent.
    fn create_or_select_stack<'a>(
        &'a self,
        unit: &'a ProvisioningUnit,
        stack_name: &'a str,
    ) -> EngineFuture<'a, StackRef, Self::Error>;

    /// Selects an existing stack, failing when it does not exist.
    fn select_stack<'a>(
        &'a self,
        unit: &'a ProvisioningUnit,
        stack_name: &'a str,
    ) -> EngineFuture<'a, StackRef, Self::Error>;

    /// Writes every entry of `config` to the stack's configuration.
    fn set_all_config<'a>(
        &'a self,
        stack: &'a StackRef,
        config: &'a ConfigMap,
    ) -> EngineFuture<'a, (), Self::Error>;

    /// Creates or updates the stack's resources.
    fn up<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error>;

    /// Reconciles recorded state with the real resources.
    fn refresh<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error>;

    /// Deletes every resource in the stack.
    fn destroy<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error>;

    /// Reads the stack's current outputs without mutating anything.
    fn outputs<'a>(&'a self, stack: &'a StackRef) -> EngineFuture<'a, StackOutputs, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn outputs() -> StackOutputs {
        [
            (
                "bastionHost",
                OutputValue {
                    value: json!("1.2.3.4"),
                    secret: false,
                },
            ),
            (
                "dbPort",
                OutputValue {
                    value: json!(5432),
                    secret: false,
                },
            ),
            (
                "empty",
                OutputValue {
                    value: json!(""),
                    secret: false,
                },
            ),
            (
                "nothing",
                OutputValue {
                    value: Value::Null,
                    secret: false,
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    #[rstest]
    #[case("bastionHost", Some("1.2.3.4"))]
    #[case("dbPort", Some("5432"))]
    #[case("empty", None)]
    #[case("nothing", None)]
    #[case("absent", None)]
    fn get_str_treats_blank_values_as_missing(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(outputs().get_str(name).as_deref(), expected);
    }

    #[rstest]
    fn config_value_constructors_set_secret_flag() {
        assert!(!ConfigValue::plain("a").secret);
        assert!(ConfigValue::secret("b").secret);
    }
}
