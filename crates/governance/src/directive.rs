//! Behavioral directive handed to every agent instance.
//!
//! This is a second layer on top of the structural profile: the agent is told
//! in plain language which operations it has and that privileged work belongs
//! to a human operator.

use agent_relay_core::{CapabilityProfile, Operation};

const PRIVILEGED_RULE: &str = "You must never write, create, modify or delete files, and you must \
never execute shell commands, directly or indirectly. Do not work around this, for example by \
searching your own source code and then describing a fix as if you had applied it. When a request \
needs any of these operations, say that a human operator has to carry it out and defer to them.";

const NO_DELEGATION_RULE: &str = "Do not hand work to other agents.";

/// Render the directive for an agent with `profile`.
pub fn render(persona: Option<&str>, profile: &CapabilityProfile) -> String {
    let mut out = String::new();
    if let Some(persona) = persona.map(str::trim).filter(|p| !p.is_empty()) {
        out.push_str(persona);
        out.push_str("\n\n");
    }

    if profile.is_empty() {
        out.push_str("You have no tool operations available in this session.");
    } else {
        out.push_str("Operations available in this session: ");
        out.push_str(&profile.to_string());
        out.push('.');
    }
    out.push('\n');
    out.push_str(PRIVILEGED_RULE);

    if !profile.contains(Operation::Delegate) {
        out.push('\n');
        out.push_str(NO_DELEGATION_RULE);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_always_forbids_privileged_work() {
        let profile: CapabilityProfile = [Operation::ReadFile, Operation::Delegate]
            .into_iter()
            .collect();
        let text = render(Some("You are Helper."), &profile);

        assert!(text.starts_with("You are Helper.\n\n"));
        assert!(text.contains("read-file, delegate"));
        assert!(text.contains("never execute shell commands"));
        assert!(text.contains("human operator"));
        assert!(!text.contains(NO_DELEGATION_RULE));
    }

    #[test]
    fn test_directive_without_delegate_or_persona() {
        let text = render(Some("   "), &CapabilityProfile::empty());
        assert!(text.starts_with("You have no tool operations"));
        assert!(text.contains(PRIVILEGED_RULE));
        assert!(text.ends_with(NO_DELEGATION_RULE));
    }
}
