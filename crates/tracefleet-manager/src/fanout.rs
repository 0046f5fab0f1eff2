//! Fan-out planning — coalesces programs that target the same agents.
//!
//! Each program's selectors yield a valid-agent set. Programs whose sets are
//! identical are grouped behind one deployment so a register fan-out sends a
//! single message per distinct agent set instead of one per program.
//!
//! Grouping keys on a fingerprint of the canonicalized agent set: agent ids
//! sorted by their 16-byte representation, hashed with SHA-256. Equal sets
//! always produce the same key; a collision between distinct sets would
//! merge programs intended for disjoint agents.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use tracefleet_state::{AgentId, TracepointDeployment};

use crate::agent::Agent;
use crate::selector::valid_agents;

/// One register message to be dispatched: the target agents and the
/// deployment slice they should install.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutGroup {
    pub agents: Vec<AgentId>,
    pub deployment: TracepointDeployment,
}

/// Partition a deployment's programs by their valid-agent sets.
///
/// Groups appear in order of each agent set's first occurrence, and program
/// order within a group follows the input deployment.
pub fn plan_register(agents: &[Agent], deployment: &TracepointDeployment) -> Vec<FanoutGroup> {
    let mut group_index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<FanoutGroup> = Vec::new();

    for program in &deployment.programs {
        let valid = valid_agents(agents, &program.selectors);
        let ids: Vec<AgentId> = valid.iter().map(|a| a.id).collect();
        let fingerprint = agent_set_fingerprint(&ids);

        match group_index.get(&fingerprint) {
            Some(&i) => groups[i].deployment.programs.push(program.clone()),
            None => {
                group_index.insert(fingerprint, groups.len());
                groups.push(FanoutGroup {
                    agents: ids,
                    deployment: TracepointDeployment {
                        name: deployment.name.clone(),
                        ttl_secs: deployment.ttl_secs,
                        deployment_spec: deployment.deployment_spec.clone(),
                        programs: vec![program.clone()],
                    },
                });
            }
        }
    }

    groups
}

/// Stable fingerprint over an agent-id set, independent of input order.
fn agent_set_fingerprint(ids: &[AgentId]) -> String {
    let mut sorted: Vec<[u8; 16]> = ids.iter().map(|id| *id.as_bytes()).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for bytes in &sorted {
        hasher.update(bytes);
    }
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
