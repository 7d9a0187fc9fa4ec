use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Malformed method signature '{0}': expected <class>:<descriptor>:<name>")]
    Malformed(String),
}

/// A method identified by its declaring class, JVM descriptor and name.
///
/// Class names use the internal form (`pkg/sub/Klass`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodSignature {
    pub class_name: String,
    pub descriptor: String,
    pub name: String,
}

impl MethodSignature {
    pub fn new(
        class_name: impl Into<String>,
        descriptor: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            descriptor: descriptor.into(),
            name: name.into(),
        }
    }

    /// Parse the `class:descriptor:name` form produced by `Display`.
    pub fn parse(text: &str) -> Result<Self, SignatureError> {
        let mut parts = text.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(class), Some(descriptor), Some(name))
                if !class.is_empty() && !descriptor.is_empty() && !name.is_empty() =>
            {
                Ok(Self::new(class, descriptor, name))
            }
            _ => Err(SignatureError::Malformed(text.to_string())),
        }
    }

    /// Class name in source form (`pkg.sub.Klass`).
    pub fn dotted_class_name(&self) -> String {
        self.class_name.replace('/', ".")
    }
}

impl std::fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.class_name, self.descriptor, self.name)
    }
}

/// Immutable identity of a concrete test method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestCase {
    pub class_name: String,
    pub method_descriptor: String,
    pub method_name: String,
}

impl TestCase {
    pub fn new(
        class_name: impl Into<String>,
        method_descriptor: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_descriptor: method_descriptor.into(),
            method_name: method_name.into(),
        }
    }

    /// Identity of the test emitted by the generator for artifact `id`:
    /// class `<TargetClass>_<id>_Test`, a no-argument `void` entry method.
    pub fn generated(target_class: &str, id: u64, entry_method: &str) -> Self {
        Self::new(format!("{target_class}_{id}_Test"), "()V", entry_method)
    }

    pub fn signature(&self) -> MethodSignature {
        MethodSignature::new(
            self.class_name.clone(),
            self.method_descriptor.clone(),
            self.method_name.clone(),
        )
    }
}

impl std::fmt::Display for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.class_name, self.method_descriptor, self.method_name
        )
    }
}
