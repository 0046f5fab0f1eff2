//! Selector evaluation — filters an agent list by program selectors.
//!
//! Each selector keeps or drops agents based on host attributes; a selector
//! list applies as a left-to-right intersection. A kernel selector whose
//! value fails to parse matches no agents at all.

use tracefleet_state::{ProgramSelector, SelectorKind};

use crate::agent::{Agent, KernelVersion};

/// Apply a single selector to an agent list.
///
/// Unknown or condition-free selector kinds retain every agent.
pub fn filter_agents<'a>(agents: Vec<&'a Agent>, selector: &ProgramSelector) -> Vec<&'a Agent> {
    match selector.kind {
        SelectorKind::MinKernel => filter_by_min_kernel(agents, &selector.value),
        SelectorKind::MaxKernel => filter_by_max_kernel(agents, &selector.value),
        SelectorKind::NoCondition => agents,
    }
}

/// Apply a selector list left-to-right, starting from all agents.
pub fn valid_agents<'a>(agents: &'a [Agent], selectors: &[ProgramSelector]) -> Vec<&'a Agent> {
    let mut valid: Vec<&Agent> = agents.iter().collect();
    for selector in selectors {
        valid = filter_agents(valid, selector);
    }
    valid
}

fn filter_by_min_kernel<'a>(agents: Vec<&'a Agent>, version: &str) -> Vec<&'a Agent> {
    let Some(min) = KernelVersion::parse(version) else {
        return Vec::new();
    };
    agents
        .into_iter()
        .filter(|a| a.host_info.kernel >= min)
        .collect()
}

fn filter_by_max_kernel<'a>(agents: Vec<&'a Agent>, version: &str) -> Vec<&'a Agent> {
    let Some(max) = KernelVersion::parse(version) else {
        return Vec::new();
    };
    agents
        .into_iter()
        .filter(|a| a.host_info.kernel <= max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::HostInfo;
    use uuid::Uuid;

    fn agent_with_kernel(major: u32, minor: u32, patch: u32) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            host_info: HostInfo {
                hostname: format!("node-{major}-{minor}-{patch}"),
                kernel: KernelVersion::new(major, minor, patch),
            },
        }
    }

    fn selector(kind: SelectorKind, value: &str) -> ProgramSelector {
        ProgramSelector {
            kind,
            value: value.to_string(),
        }
    }

    #[test]
    fn min_kernel_keeps_equal_and_newer() {
        let agents = vec![
            agent_with_kernel(5, 4, 0),
            agent_with_kernel(5, 10, 0),
            agent_with_kernel(6, 1, 0),
        ];
        let kept = valid_agents(&agents, &[selector(SelectorKind::MinKernel, "5.10.0")]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|a| a.host_info.kernel >= KernelVersion::new(5, 10, 0)));
    }

    #[test]
    fn max_kernel_keeps_equal_and_older() {
        let agents = vec![
            agent_with_kernel(5, 4, 0),
            agent_with_kernel(5, 10, 0),
            agent_with_kernel(6, 1, 0),
        ];
        let kept = valid_agents(&agents, &[selector(SelectorKind::MaxKernel, "5.10.0")]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|a| a.host_info.kernel <= KernelVersion::new(5, 10, 0)));
    }

    #[test]
    fn patch_level_is_significant() {
        let agents = vec![agent_with_kernel(5, 10, 3), agent_with_kernel(5, 10, 4)];
        let kept = valid_agents(&agents, &[selector(SelectorKind::MinKernel, "5.10.4")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].host_info.kernel.patch, 4);
    }

    #[test]
    fn malformed_version_fails_closed() {
        let agents = vec![agent_with_kernel(5, 10, 0)];
        assert!(valid_agents(&agents, &[selector(SelectorKind::MinKernel, "not-a-version")]).is_empty());
        assert!(valid_agents(&agents, &[selector(SelectorKind::MaxKernel, "5.10")]).is_empty());
    }

    #[test]
    fn no_condition_keeps_everyone() {
        let agents = vec![agent_with_kernel(4, 19, 0), agent_with_kernel(6, 1, 0)];
        let kept = valid_agents(&agents, &[selector(SelectorKind::NoCondition, "ignored")]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn selector_list_intersects_left_to_right() {
        let agents = vec![
            agent_with_kernel(4, 19, 0),
            agent_with_kernel(5, 10, 0),
            agent_with_kernel(6, 1, 0),
        ];
        let kept = valid_agents(
            &agents,
            &[
                selector(SelectorKind::MinKernel, "5.0.0"),
                selector(SelectorKind::MaxKernel, "5.15.0"),
            ],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].host_info.kernel, KernelVersion::new(5, 10, 0));
    }

    #[test]
    fn empty_selector_list_keeps_everyone() {
        let agents = vec![agent_with_kernel(5, 10, 0)];
        assert_eq!(valid_agents(&agents, &[]).len(), 1);
    }
}
