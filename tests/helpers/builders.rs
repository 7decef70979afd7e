use iamsynth::synth::types::{ConditionDecl, Effect, GrantDecl, IntentContext, ParsedIntent, TrustDecl};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-2";

/// Builder for declared grants
pub struct GrantBuilder {
    decl: GrantDecl,
}

impl GrantBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            decl: GrantDecl {
                name: name.to_string(),
                actor: "ci".to_string(),
                effect: Effect::Allow,
                actions: Vec::new(),
                resources: Vec::new(),
                conditions: Vec::new(),
                justification: None,
            },
        }
    }

    pub fn actor(mut self, actor: &str) -> Self {
        self.decl.actor = actor.to_string();
        self
    }

    pub fn deny(mut self) -> Self {
        self.decl.effect = Effect::Deny;
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.decl.actions.push(action.to_string());
        self
    }

    pub fn resource(mut self, resource: &str) -> Self {
        self.decl.resources.push(resource.to_string());
        self
    }

    pub fn condition(mut self, operator: &str, key: &str, value: &str) -> Self {
        self.decl.conditions.push(ConditionDecl {
            key: key.to_string(),
            operator: operator.to_string(),
            values: vec![value.to_string()],
        });
        self
    }

    pub fn justification(mut self, text: &str) -> Self {
        self.decl.justification = Some(text.to_string());
        self
    }

    pub fn build(self) -> GrantDecl {
        self.decl
    }
}

/// Builder for declared trust relationships
pub struct TrustBuilder {
    decl: TrustDecl,
}

impl TrustBuilder {
    pub fn github(name: &str) -> Self {
        Self {
            decl: TrustDecl {
                name: name.to_string(),
                actor: "ci".to_string(),
                provider: "token.actions.githubusercontent.com".to_string(),
                audience: None,
                subjects: Vec::new(),
            },
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.decl.subjects.push(subject.to_string());
        self
    }

    pub fn build(self) -> TrustDecl {
        self.decl
    }
}

/// A single intent document with the shared test account and region.
pub fn intent(grants: Vec<GrantDecl>, trusts: Vec<TrustDecl>) -> ParsedIntent {
    ParsedIntent {
        context: IntentContext {
            partition: None,
            region: Some(REGION.to_string()),
            account: Some(ACCOUNT.to_string()),
        },
        grants,
        trusts,
    }
}
