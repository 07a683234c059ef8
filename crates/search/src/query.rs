use drift_protocol::{BehavioralUnit, Operation};
use drift_vector_store::tokenize;
use std::collections::BTreeSet;

/// Receiver names carry no meaning for retrieval
const RECEIVERS: &[&str] = &["self", "this", "cls"];

/// What a unit is looked up by: its name, effect targets, guards and callees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitQuery {
    /// Embedded as-is
    pub text: String,
    pub terms: BTreeSet<String>,
}

impl UnitQuery {
    pub fn from_unit(unit: &BehavioralUnit) -> Self {
        let mut words: Vec<String> = vec![unit.source_location.symbol.clone()];
        for effect in &unit.effects {
            if effect.operation != Operation::Read {
                words.push(effect.operation.as_str().to_string());
            }
            words.push(effect.target.name().to_string());
            if let Some(condition) = &effect.condition {
                words.push(condition.as_str().to_string());
            }
        }
        for condition in &unit.preconditions {
            words.push(condition.as_str().to_string());
        }
        for call in &unit.calls {
            words.push(call.resolved.clone().unwrap_or_else(|| call.callee.clone()));
        }
        Self::from_text(&words.join(" "))
    }

    pub fn from_text(text: &str) -> Self {
        let tokens: Vec<String> = tokenize(text)
            .into_iter()
            .filter(|term| !RECEIVERS.contains(&term.as_str()))
            .collect();
        Self {
            text: tokens.join(" "),
            terms: tokens.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_protocol::{Effect, EffectTarget, Fork, SourceLocation, UnitKind};

    #[test]
    fn query_uses_targets_and_drops_receivers() {
        let unit = BehavioralUnit {
            id: "vault.py::Vault.withdraw".into(),
            source_location: SourceLocation {
                path: "vault.py".into(),
                line_start: 3,
                line_end: 5,
                symbol: "Vault.withdraw".into(),
            },
            kind: UnitKind::StateTransition,
            language: "python".into(),
            fork: Fork::default(),
            effects: vec![Effect::new(
                EffectTarget::StateVariable("self.balance".into()),
                Operation::Write,
                4,
            )],
            preconditions: Default::default(),
            calls: Default::default(),
        };
        let query = UnitQuery::from_unit(&unit);
        assert_eq!(query.text, "vault withdraw write balance");
        assert!(!query.terms.contains("self"));
    }
}
