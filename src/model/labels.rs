use std::collections::HashSet;

use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};

/// Ordered class names; the index of a name is its label id.
///
/// Derived once from the training split and persisted with the model, so
/// the serving side reads the mapping back instead of assuming one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassLabelSpace {
    names: Vec<String>,
}

impl ClassLabelSpace {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::InvalidInput("class label space is empty".into()));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate class name '{}'", name)));
            }
        }
        Ok(ClassLabelSpace { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; an empty space cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Fails unless `other` has the same names in the same order.
    pub fn ensure_same(&self, other: &ClassLabelSpace, context: &str) -> Result<()> {
        if self != other {
            return Err(Error::InvalidInput(format!(
                "{}: classes {:?} do not match {:?}",
                context, other.names, self.names
            )));
        }
        Ok(())
    }
}

impl TryFrom<Vec<String>> for ClassLabelSpace {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        ClassLabelSpace::new(names)
    }
}

impl From<ClassLabelSpace> for Vec<String> {
    fn from(space: ClassLabelSpace) -> Self {
        space.names
    }
}
