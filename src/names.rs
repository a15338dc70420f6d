use uuid::Uuid;

/// Supplies placeholder names for TOC entries stored without one.
pub trait UniqueNameGenerator {
    fn unique_name(&mut self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidNames;

impl UniqueNameGenerator for UuidNames {
    fn unique_name(&mut self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// `prefix0`, `prefix1`, ... Deterministic, for reproducible listings.
#[derive(Debug, Clone)]
pub struct SequentialNames {
    prefix: String,
    next: usize,
}

impl SequentialNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }
}

impl UniqueNameGenerator for SequentialNames {
    fn unique_name(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_names_differ() {
        let mut names = UuidNames;
        let a = names.unique_name();
        let b = names.unique_name();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn sequential_names_count_up() {
        let mut names = SequentialNames::new("unnamed_");
        assert_eq!(names.unique_name(), "unnamed_0");
        assert_eq!(names.unique_name(), "unnamed_1");
    }
}
