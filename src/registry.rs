use std::collections::HashMap;
use std::sync::Arc;

use crate::a2a::AgentCard;
use crate::agent::ConversationalAgent;

/// Explicitly owned agent registry: name -> card + handle.
///
/// Deliberately not a module-level singleton. Callers construct one, fill
/// it, and pass it by reference, so independent adapter instances in the
/// same process never interfere.
#[derive(Default)]
pub struct AgentRegistry {
    entries: HashMap<String, RegistryEntry>,
}

struct RegistryEntry {
    card: AgentCard,
    agent: Arc<dyn ConversationalAgent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register an agent under its card's name, replacing any previous
    /// entry with that name.
    pub fn register(&mut self, card: AgentCard, agent: Arc<dyn ConversationalAgent>) {
        self.entries
            .insert(card.name.clone(), RegistryEntry { card, agent });
    }

    pub fn card(&self, name: &str) -> Option<&AgentCard> {
        self.entries.get(name).map(|entry| &entry.card)
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn ConversationalAgent>> {
        self.entries.get(name).map(|entry| Arc::clone(&entry.agent))
    }

    pub fn cards(&self) -> impl Iterator<Item = &AgentCard> {
        self.entries.values().map(|entry| &entry.card)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::AgentCapabilities;
    use crate::agent::ScriptedAgent;

    fn card(name: &str) -> AgentCard {
        AgentCard {
            name: name.to_string(),
            description: format!("{name} test agent"),
            version: "0.1.0".to_string(),
            capabilities: AgentCapabilities {
                streaming: Some(true),
                state_transition_history: None,
            },
            skills: Vec::new(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = AgentRegistry::new();
        registry.register(card("dice"), Arc::new(ScriptedAgent::new("dice")));
        registry.register(card("weather"), Arc::new(ScriptedAgent::new("weather")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.card("dice").unwrap().name, "dice");
        assert!(registry.agent("weather").is_some());
        assert!(registry.card("unknown").is_none());
    }

    #[test]
    fn test_instances_are_independent() {
        let mut first = AgentRegistry::new();
        first.register(card("dice"), Arc::new(ScriptedAgent::new("dice")));
        let second = AgentRegistry::new();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}
