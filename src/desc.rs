use std::{collections::BTreeMap, fmt::Write as _, sync::Arc};

use crate::error::Error;

/// Label key/value pairs bound to one metric instance. Shared between every
/// snapshot the instance produces.
pub type Labels = Arc<BTreeMap<String, String>>;

/// Join the non-empty name components with `.`. An empty `name` always
/// produces an empty (and therefore invalid) fq name.
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

/// The identity and schema of a metric. Construction never fails; problems are
/// recorded and surfaced when the descriptor is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desc {
    fq_name: String,
    help: String,
    label_keys: Vec<String>,
    step: u32,
    invalid: Option<&'static str>,
}

impl Desc {
    pub fn new(fq_name: impl Into<String>, help: impl Into<String>, step: u32, label_keys: &[&str]) -> Self {
        let fq_name = fq_name.into();
        let label_keys: Vec<String> = label_keys.iter().map(|k| k.to_string()).collect();
        let invalid = if fq_name.is_empty() {
            Some("fq name must not be empty")
        } else if step == 0 {
            Some("step must be greater than 0")
        } else if label_keys
            .iter()
            .enumerate()
            .any(|(idx, key)| label_keys[..idx].contains(key))
        {
            Some("label keys must be unique")
        } else {
            None
        };
        Self {
            fq_name,
            help: help.into(),
            label_keys,
            step,
            invalid,
        }
    }

    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn has_label_key(&self, key: &str) -> bool {
        self.label_keys.iter().any(|k| k == key)
    }

    /// The error recorded at construction, if any.
    pub fn error(&self) -> Option<Error> {
        self.invalid.map(|reason| Error::InvalidDescriptor {
            name: self.fq_name.clone(),
            reason,
        })
    }

    pub(crate) fn check_arity(&self, values: usize) -> Result<(), Error> {
        if values != self.label_keys.len() {
            return Err(Error::LabelArity {
                name: self.fq_name.clone(),
                expected: self.label_keys.len(),
                actual: values,
            });
        }
        Ok(())
    }

    /// Build the lookup key for a set of label values. Pairs are written in
    /// declaration order so the same values always land on the same key.
    /// `\`, `,` and `=` inside values are backslash escaped, so distinct
    /// value tuples never share a key. Callers must have checked arity already.
    pub(crate) fn signature(&self, values: &[&str]) -> String {
        debug_assert_eq!(values.len(), self.label_keys.len());
        let mut sig = String::with_capacity(self.fq_name.len() + 16 * values.len());
        sig.push_str(&self.fq_name);
        for (idx, (key, value)) in self.label_keys.iter().zip(values).enumerate() {
            if idx > 0 {
                sig.push(',');
            }
            let _ = write!(sig, "{key}=");
            for c in value.chars() {
                if matches!(c, '\\' | ',' | '=') {
                    sig.push('\\');
                }
                sig.push(c);
            }
        }
        sig
    }

    pub(crate) fn label_map(&self, values: &[&str]) -> Labels {
        Arc::new(
            self.label_keys
                .iter()
                .zip(values)
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        )
    }
}
