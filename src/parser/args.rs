//! Call arguments as they arrive from the dynamic side

use crate::value::Value;

/// Receiver, positional and keyword arguments of one call.
///
/// Keyword names are values, not strings, because nothing forces a caller
/// to pass string names; the parser reports the ones that are not.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    receiver: Option<Value>,
    positional: Vec<Value>,
    keywords: Vec<(Value, Value)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            ..Self::default()
        }
    }

    /// The object a method was invoked on, as in `obj.method(...)`.
    pub fn with_receiver(mut self, receiver: Value) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keywords.push((Value::str(name), value.into()));
        self
    }

    /// A keyword argument whose name is an arbitrary value.
    pub fn kwarg_value(mut self, name: Value, value: impl Into<Value>) -> Self {
        self.keywords.push((name, value.into()));
        self
    }

    pub fn receiver(&self) -> Option<&Value> {
        self.receiver.as_ref()
    }

    pub fn args(&self) -> &[Value] {
        &self.positional
    }

    pub fn keywords(&self) -> &[(Value, Value)] {
        &self.keywords
    }

    /// Value of the keyword argument called `name`, and its index.
    pub(crate) fn keyword(&self, name: &str) -> Option<(usize, &Value)> {
        self.keywords
            .iter()
            .enumerate()
            .find(|(_, (key, _))| key.as_str() == Some(name))
            .map(|(index, (_, value))| (index, value))
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }
}
