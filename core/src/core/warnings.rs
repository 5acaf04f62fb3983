use std::fmt;

/// Non-fatal errors collected over a patrol run.
///
/// A patrol keeps going when a single project, channel or issue fails; each
/// of those failures lands here so the caller can tell a clean run from a
/// degraded one.
#[derive(Debug, Default)]
pub struct Warnings {
    errors: Vec<anyhow::Error>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: anyhow::Error) {
        self.errors.push(err);
    }

    /// Appends every warning of `other`, keeping the summary line as context.
    pub fn merge(&mut self, summary: &str, other: Warnings) {
        for err in other.errors {
            self.errors.push(err.context(summary.to_string()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.errors.iter()
    }

    /// `None` when nothing went wrong.
    pub fn into_option(self) -> Option<Warnings> {
        if self.is_empty() { None } else { Some(self) }
    }
}

impl Extend<anyhow::Error> for Warnings {
    fn extend<I: IntoIterator<Item = anyhow::Error>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl IntoIterator for Warnings {
    type Item = anyhow::Error;
    type IntoIter = std::vec::IntoIter<anyhow::Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for Warnings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:#}", err)?;
        }
        Ok(())
    }
}
