use crate::config::types::PatternConfig;
use crate::ingress::event::BusEnvelope;

/// Rule predicate over bus envelopes. Each non-empty list must contain the
/// envelope's value; empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPattern {
    pub accounts: Vec<String>,
    pub sources: Vec<String>,
    pub detail_types: Vec<String>,
}

impl EventPattern {
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            accounts: vec![account.into()],
            ..Self::default()
        }
    }

    pub fn matches(&self, envelope: &BusEnvelope) -> bool {
        allows(&self.accounts, &envelope.account)
            && allows(&self.sources, &envelope.source)
            && allows(&self.detail_types, &envelope.detail_type)
    }
}

fn allows(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|v| v == value)
}

impl From<&PatternConfig> for EventPattern {
    fn from(config: &PatternConfig) -> Self {
        Self {
            accounts: config.accounts.clone(),
            sources: config.sources.clone(),
            detail_types: config.detail_types.clone(),
        }
    }
}
