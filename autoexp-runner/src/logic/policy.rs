use std::fmt;

use anyhow::{Result, bail};
use autoexp_core::sandbox::ScriptedAgent;

/// Scripted paddle agents the runner can explain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentKind {
    StayAlive,
    StayAliveJitter,
    MoveOnlyFalling,
}

impl AgentKind {
    pub const ALL: [Self; 3] = [
        Self::StayAlive,
        Self::StayAliveJitter,
        Self::MoveOnlyFalling,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StayAlive => "StayAlive",
            Self::StayAliveJitter => "StayAliveJitter",
            Self::MoveOnlyFalling => "MoveOnlyFalling",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::StayAlive => "tracks the ball every tick",
            Self::StayAliveJitter => "tracks the ball as it drifts away, skipping some moves",
            Self::MoveOnlyFalling => "tracks the ball only while it falls",
        }
    }

    /// Case-insensitive lookup by label.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(token))
    }

    /// Build a fresh agent whose randomness (if any) is keyed by `seed`.
    ///
    /// # Errors
    ///
    /// Fails only if the core crate no longer knows this agent's name.
    pub fn create_agent(self, seed: u64) -> Result<ScriptedAgent> {
        match ScriptedAgent::from_name(self.label(), seed) {
            Some(agent) => Ok(agent),
            None => bail!("agent {} is not available in the sandbox", self.label()),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolve CLI agent tokens; `all` expands to every scripted agent.
///
/// Duplicates are dropped and first-seen order is kept.
///
/// # Errors
///
/// Returns an error naming the first unknown token.
pub fn resolve_agents(tokens: &[String]) -> Result<Vec<AgentKind>> {
    let mut agents: Vec<AgentKind> = Vec::new();
    for token in tokens {
        let expanded: Vec<AgentKind> = if token.eq_ignore_ascii_case("all") {
            AgentKind::ALL.to_vec()
        } else if let Some(kind) = AgentKind::parse(token) {
            vec![kind]
        } else {
            bail!(
                "Unknown agent: {token} (expected one of {})",
                AgentKind::ALL.map(AgentKind::label).join(", ")
            );
        };
        for kind in expanded {
            if !agents.contains(&kind) {
                agents.push(kind);
            }
        }
    }
    if agents.is_empty() {
        agents.push(AgentKind::StayAlive);
    }
    Ok(agents)
}
