pub mod explain;
pub mod policy;
pub mod reports;
pub mod seeds;
pub mod session;

pub use explain::{ExplainBatch, ExplainPlan, ExplainRecord, run_plan};
pub use policy::{AgentKind, resolve_agents};
pub use seeds::resolve_seed_inputs;
pub use session::SessionSettings;
