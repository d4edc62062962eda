/// Resolves who a revision is attributed to.
pub trait Identity: Send + Sync {
    /// Author for commits the engine makes on its own behalf.
    fn system(&self) -> String;

    /// Author for a caller-initiated commit.
    fn resolve(&self, caller: Option<&str>) -> String {
        match caller.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.system(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticIdentity {
    system: String,
}

impl StaticIdentity {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
        }
    }
}

impl Identity for StaticIdentity {
    fn system(&self) -> String {
        self.system.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_falls_back_to_system() {
        let identity = StaticIdentity::new("confvault");
        assert_eq!(identity.resolve(Some("cursor-agent")), "cursor-agent");
        assert_eq!(identity.resolve(Some("  ")), "confvault");
        assert_eq!(identity.resolve(None), "confvault");
    }
}
